//! HTTP dispatcher: routing, transport and auth checks, response helpers.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::{
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::bot;
use crate::cache::{ImageMemo, RelayCache};
use crate::config::Settings;
use crate::error::BotError;
use crate::relay::Relay;
use crate::signer::Keys;
use crate::storage::KvStore;

/// Everything a handler may touch, shared across requests.
pub struct AppState {
    pub keys: Keys,
    pub cache: RelayCache,
    pub memo: Arc<ImageMemo>,
    pub settings: Settings,
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        settings: Settings,
        keys: Keys,
        store: Arc<dyn KvStore>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self> {
        let memo = Arc::new(ImageMemo::new());
        let cache = RelayCache::new(store, relay, Arc::clone(&memo), settings.cache_ttl);
        let http = reqwest::Client::builder()
            .timeout(settings.relay_timeout)
            .user_agent(concat!("nullpoga/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            keys,
            cache,
            memo,
            settings,
            http,
        })
    }
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Build the dispatcher.
///
/// - `GET /healthz` (plain HTTP allowed)
/// - `GET /relationship/:pubkey`, `GET /relationship/:pubkey/:other/{follow,mute}`
/// - `GET /profile/:pubkey`, `GET /first/:pubkey?kind=N`
/// - `GET /update` (bearer)
/// - `POST /like`, `POST /ping` (bearer), `POST /image/:name`
pub fn router(state: SharedState) -> Router {
    // Method fallbacks sit outside the bearer layer so an unsupported method
    // is reported as such before credentials are checked.
    let bearer = middleware::from_fn_with_state(Arc::clone(&state), require_bearer);

    // Routes added after the HTTPS layer are not wrapped by it.
    Router::new()
        .route(
            "/relationship/:pubkey",
            get(bot::relationship).fallback(fallback),
        )
        .route(
            "/relationship/:pubkey/:other/:list",
            get(bot::relationship_check).fallback(fallback),
        )
        .route("/profile/:pubkey", get(bot::profile).fallback(fallback))
        .route("/first/:pubkey", get(bot::first_post).fallback(fallback))
        .route("/like", post(bot::like).fallback(fallback))
        .route("/image/:name", post(bot::image).fallback(fallback))
        .route(
            "/update",
            get(bot::update)
                .route_layer(bearer.clone())
                .fallback(fallback),
        )
        .route(
            "/ping",
            post(bot::ping).route_layer(bearer).fallback(fallback),
        )
        .fallback(fallback)
        .layer(middleware::from_fn(require_https))
        .route("/healthz", get(healthz).fallback(fallback))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Start the HTTP dispatcher on `addr` until `shutdown` resolves.
pub async fn serve_http(
    addr: SocketAddr,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serialize `value` with the JSON headers every bot answer carries.
pub fn json_response<T: Serialize>(value: &T) -> Result<Response, BotError> {
    let body = serde_json::to_vec(value).map_err(|e| BotError::Encoding(e.to_string()))?;
    Ok((
        [
            (CONTENT_TYPE, "application/json; charset=UTF-8"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response())
}

/// Empty 200: the bot saw the message and chose not to answer.
pub fn no_action() -> Response {
    StatusCode::OK.into_response()
}

async fn healthz() -> Result<Response, BotError> {
    json_response(&Health {
        status: "ok".to_string(),
    })
}

/// Unknown path, or a method the route does not serve.
async fn fallback(method: Method) -> Response {
    if method == Method::GET || method == Method::POST {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Unsupported method").into_response()
    }
}

async fn log_request(req: Request, next: Next) -> Response {
    tracing::info!(method = %req.method(), path = %req.uri().path(), "request");
    next.run(req).await
}

/// Reject anything the fronting proxy did not receive over HTTPS.
async fn require_https(req: Request, next: Next) -> Result<Response, BotError> {
    let proto = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());
    if proto != Some("https") {
        return Err(BotError::InsecureTransport);
    }
    Ok(next.run(req).await)
}

async fn require_bearer(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, BotError> {
    let Some(expected) = state.settings.bearer_token.as_deref() else {
        tracing::debug!("no bearer token configured");
        return Err(BotError::Authentication);
    };
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    if token != Some(expected) {
        tracing::debug!("missing or invalid bearer token");
        return Err(BotError::Authentication);
    }
    Ok(next.run(req).await)
}
