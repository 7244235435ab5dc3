//! Reference tag merging for replies and notes.

use crate::event::{Event, Tag, KIND_CHANNEL_MESSAGE};

/// Which reference tags lead the merged tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    /// `["e", cause.id]` followed by `["p", cause.pubkey]`; pings the author.
    Mention,
    /// Only `["e", cause.id]`, for replies that should not notify the author.
    Quiet,
    /// No reference to the cause at all (ambient notes).
    Skip,
}

/// Compute the final tag sequence for a message caused by `cause`.
///
/// Order is prefix, then the cause's own `e` tags when it is a channel
/// message (so the reply lands in the same channel), then `extra`.
/// Nothing is de-duplicated.
pub fn merge(cause: &Event, extra: &[Tag], prefix: Prefix) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(2 + cause.tags.len() + extra.len());
    match prefix {
        Prefix::Mention => {
            tags.push(Tag::new(["e", cause.id.as_str()]));
            tags.push(Tag::new(["p", cause.pubkey.as_str()]));
        }
        Prefix::Quiet => tags.push(Tag::new(["e", cause.id.as_str()])),
        Prefix::Skip => {}
    }
    if cause.kind == KIND_CHANNEL_MESSAGE {
        tags.extend(cause.tags_named("e").cloned());
    }
    tags.extend_from_slice(extra);
    tags
}
