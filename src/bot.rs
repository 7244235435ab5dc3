//! Request handlers behind the dispatcher routes.
//!
//! Each handler decodes the causing event (if any), consults the relay cache
//! and answers with a signed message, a lookup result or an empty body.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::Response,
};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::cache::now_secs;
use crate::error::BotError;
use crate::event::{Event, Tag, KIND_NOTE};
use crate::factory::{build_reaction, build_reply};
use crate::first_post::FirstPostFinder;
use crate::server::{json_response, no_action, SharedState};
use crate::signer::parse_pubkey;

/// `GET /relationship/:pubkey`
pub async fn relationship(
    State(state): State<SharedState>,
    Path(pubkey): Path<String>,
) -> Result<Response, BotError> {
    let pubkey = parse_pubkey(&pubkey)?;
    json_response(&state.cache.relation(&pubkey).await?)
}

/// `GET /relationship/:pubkey/:other/follow` or `.../mute`
pub async fn relationship_check(
    State(state): State<SharedState>,
    Path((pubkey, other, list)): Path<(String, String, String)>,
) -> Result<Response, BotError> {
    if list != "follow" && list != "mute" {
        return Err(BotError::NotFound(format!("relationship list {list}")));
    }
    let pubkey = parse_pubkey(&pubkey)?;
    let other = parse_pubkey(&other)?;
    let relation = state.cache.relation(&pubkey).await?;
    let hit = if list == "follow" {
        relation.follows(&other)
    } else {
        relation.mutes(&other)
    };
    json_response(&hit)
}

/// `GET /profile/:pubkey`
pub async fn profile(
    State(state): State<SharedState>,
    Path(pubkey): Path<String>,
) -> Result<Response, BotError> {
    let pubkey = parse_pubkey(&pubkey)?;
    json_response(&state.cache.profile(&pubkey).await?)
}

#[derive(Debug, Deserialize)]
pub struct FirstParams {
    kind: Option<u32>,
}

/// `GET /first/:pubkey?kind=N`
pub async fn first_post(
    State(state): State<SharedState>,
    Path(pubkey): Path<String>,
    Query(params): Query<FirstParams>,
) -> Result<Response, BotError> {
    let pubkey = parse_pubkey(&pubkey)?;
    let kind = params.kind.unwrap_or(KIND_NOTE);
    let finder = FirstPostFinder::new(state.cache.relay().as_ref());
    match finder.find(&pubkey, kind, now_secs()).await? {
        Some(ev) => json_response(&ev),
        None => Err(BotError::NotFound(format!("kind {kind} events of {pubkey}"))),
    }
}

/// `GET /update`: forget memoized image lists.
pub async fn update(State(state): State<SharedState>) -> Result<Response, BotError> {
    state.cache.invalidate_all();
    json_response(&json!({ "status": "OK" }))
}

/// `POST /like`
pub async fn like(State(state): State<SharedState>, body: Bytes) -> Result<Response, BotError> {
    let cause = Event::from_json(&body)?;
    json_response(&build_reaction(&state.keys, &cause)?)
}

/// `POST /ping`: answer "ping" with "pong".
pub async fn ping(State(state): State<SharedState>, body: Bytes) -> Result<Response, BotError> {
    let cause = Event::from_json(&body)?;
    if !cause.content.trim().eq_ignore_ascii_case("ping") {
        return Ok(no_action());
    }
    json_response(&build_reply(&state.keys, &cause, "pong", &[])?)
}

/// `POST /image/:name`: reply with a random picture from a configured list.
pub async fn image(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, BotError> {
    let list_url = state
        .settings
        .image_list(&name)
        .ok_or_else(|| BotError::NotFound(format!("image list {name}")))?
        .to_string();
    let cause = Event::from_json(&body)?;
    let images = state
        .memo
        .get_or_populate(&name, || fetch_image_list(&state.http, &list_url))
        .await?;
    let Some(picked) = images.choose(&mut rand::thread_rng()) else {
        // retry the download next time instead of memoizing nothing
        state.memo.invalidate(&name);
        return Err(BotError::NotFound(format!("images in list {name}")));
    };
    let content = format!("#{name}\n{picked}");
    let tags = [Tag::new(["t", name.as_str()])];
    json_response(&build_reply(&state.keys, &cause, &content, &tags)?)
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    src: String,
}

/// Download a JSON array of `{"src": ...}` objects and resolve each entry
/// against the list URL.
pub async fn fetch_image_list(
    client: &reqwest::Client,
    list_url: &str,
) -> Result<Vec<String>, BotError> {
    let base = Url::parse(list_url).map_err(|e| BotError::Upstream(format!("{list_url}: {e}")))?;
    tracing::info!(url = %base, "fetching image list");
    let items: Vec<ImageItem> = client
        .get(base.clone())
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| BotError::Upstream(e.to_string()))?
        .json()
        .await
        .map_err(|e| BotError::Upstream(format!("{list_url}: {e}")))?;
    Ok(items
        .iter()
        .filter_map(|item| resolve_src(&base, &item.src))
        .collect())
}

fn resolve_src(base: &Url, src: &str) -> Option<String> {
    match base.join(src) {
        Ok(url) => Some(url.into()),
        Err(e) => {
            tracing::debug!(src, error = %e, "skipping unresolvable image");
            None
        }
    }
}
