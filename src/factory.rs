//! Builders for the messages the bot publishes in response to a causing event.
//!
//! Every message is timestamped one second after its cause rather than with
//! the wall clock, so clients sorting by `created_at` always show the reply
//! after the message it answers.

use crate::error::BotError;
use crate::event::{Event, Tag, KIND_REACTION};
use crate::signer::{finalize, Keys};
use crate::tags::{merge, Prefix};

/// Content of the reaction the bot sends for "likes".
pub const REACTION_CONTENT: &str = "🩷";

/// Reply to `cause`, mentioning its author.
///
/// Fails with [`BotError::SelfAddress`] when `cause` was written by the bot.
pub fn build_reply(
    keys: &Keys,
    cause: &Event,
    body: &str,
    extra: &[Tag],
) -> Result<Event, BotError> {
    reply_with_prefix(keys, cause, body, extra, Prefix::Mention)
}

/// Reply to `cause` without a `p` tag, so its author is not notified.
pub fn build_reply_quiet(
    keys: &Keys,
    cause: &Event,
    body: &str,
    extra: &[Tag],
) -> Result<Event, BotError> {
    reply_with_prefix(keys, cause, body, extra, Prefix::Quiet)
}

fn reply_with_prefix(
    keys: &Keys,
    cause: &Event,
    body: &str,
    extra: &[Tag],
    prefix: Prefix,
) -> Result<Event, BotError> {
    if cause.pubkey == keys.public_key() {
        return Err(BotError::SelfAddress);
    }
    let tags = merge(cause, extra, prefix);
    finalize(keys, next_second(cause), cause.kind, tags, body.to_string())
}

/// Ambient note in the same kind (and channel) as `cause`, without referencing it.
pub fn build_note(
    keys: &Keys,
    cause: &Event,
    body: &str,
    extra: &[Tag],
) -> Result<Event, BotError> {
    let tags = merge(cause, extra, Prefix::Skip);
    finalize(keys, next_second(cause), cause.kind, tags, body.to_string())
}

/// Kind 7 reaction to `cause`.
pub fn build_reaction(keys: &Keys, cause: &Event) -> Result<Event, BotError> {
    finalize(
        keys,
        next_second(cause),
        KIND_REACTION,
        vec![Tag::new(["e", cause.id.as_str()])],
        REACTION_CONTENT.to_string(),
    )
}

fn next_second(cause: &Event) -> u64 {
    cause.created_at.saturating_add(1)
}
