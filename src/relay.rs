//! Single-shot relay queries over WebSocket.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::BotError;
use crate::event::Event;

/// Subset of a NIP-01 filter the bot needs.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Latest event of `kind` by `author`.
    pub fn latest(kind: u32, author: &str) -> Self {
        Self {
            kinds: vec![kind],
            authors: vec![author.to_string()],
            until: None,
            limit: Some(1),
        }
    }

    /// Restrict to events created at or before `until`.
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Whether `ev` satisfies the filter; relays are not trusted to apply it.
    pub fn matches(&self, ev: &Event) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&ev.kind))
            && (self.authors.is_empty() || self.authors.iter().any(|a| a == &ev.pubkey))
            && self.until.map_or(true, |u| ev.created_at <= u)
    }
}

/// Relay query primitive: the single most recent event matching a filter.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn query(&self, filter: &Filter) -> Result<Option<Event>, BotError>;
}

/// Relay reached over a WebSocket, optionally through a SOCKS5 proxy.
#[derive(Debug, Clone)]
pub struct WsRelay {
    url: String,
    socks: Option<String>,
    timeout: Duration,
}

impl WsRelay {
    pub fn new(url: impl Into<String>, socks: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            socks,
            timeout,
        }
    }

    /// Open a subscription, collect events until EOSE and keep the newest.
    async fn fetch(&self, filter: &Filter) -> anyhow::Result<Option<Event>> {
        let mut ws = connect_ws(&self.url, self.socks.as_deref()).await?;
        let sub_id = format!("nullpoga-{:08x}", rand::random::<u32>());
        let req = json!(["REQ", sub_id, filter]);
        ws.send(Message::Text(req.to_string())).await?;

        let mut best: Option<Event> = None;
        let mut eose = false;
        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(txt) => {
                    let Ok(val) = serde_json::from_str::<Value>(&txt) else {
                        continue;
                    };
                    let Some(arr) = val.as_array() else {
                        continue;
                    };
                    match arr.first().and_then(|v| v.as_str()) {
                        Some("EVENT") if arr.len() >= 3 => {
                            if arr[1].as_str() != Some(sub_id.as_str()) {
                                continue;
                            }
                            match serde_json::from_value::<Event>(arr[2].clone()) {
                                Ok(ev) if filter.matches(&ev) => {
                                    if best.as_ref().map_or(true, |b| ev.created_at > b.created_at)
                                    {
                                        best = Some(ev);
                                    }
                                }
                                Ok(ev) => tracing::debug!(id = %ev.id, "relay sent non-matching event"),
                                Err(e) => tracing::debug!(error = %e, "skipping malformed event"),
                            }
                        }
                        Some("EOSE") => {
                            if arr.get(1).and_then(|v| v.as_str()) != Some(sub_id.as_str()) {
                                continue;
                            }
                            eose = true;
                            break;
                        }
                        Some("CLOSED") => {
                            let reason = arr.get(2).and_then(|v| v.as_str()).unwrap_or("");
                            return Err(anyhow!("subscription closed by relay: {reason}"));
                        }
                        Some("NOTICE") => {
                            tracing::debug!(notice = %txt, "relay notice");
                        }
                        _ => {}
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        if !eose {
            // results are only complete once EOSE arrives
            return Err(anyhow!("relay closed before EOSE"));
        }
        // Best effort; the relay may already have hung up.
        let _ = ws.send(Message::Text(json!(["CLOSE", sub_id]).to_string())).await;
        let _ = ws.close(None).await;
        Ok(best)
    }
}

#[async_trait]
impl Relay for WsRelay {
    async fn query(&self, filter: &Filter) -> Result<Option<Event>, BotError> {
        tracing::debug!(relay = %self.url, ?filter, "relay query");
        match tokio::time::timeout(self.timeout, self.fetch(filter)).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(e)) => Err(BotError::RelayUnavailable(format!("{}: {e}", self.url))),
            Err(_) => Err(BotError::RelayUnavailable(format!(
                "{}: timed out after {:?}",
                self.url, self.timeout
            ))),
        }
    }
}

/// Establish a WebSocket connection (TLS for `wss://`), optionally via a SOCKS5 proxy.
async fn connect_ws(
    relay: &str,
    socks: Option<&str>,
) -> anyhow::Result<WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
