//! Locate an author's earliest event by bisecting relay history.

use crate::error::BotError;
use crate::event::Event;
use crate::relay::{Filter, Relay};

/// Binary search over `[0, now]` using "latest event at or before `until`" probes.
///
/// Each probe is a relay round trip and depends on the previous result, so
/// probes run strictly one after another (about 32 for epoch-scale `now`).
pub struct FirstPostFinder<'a> {
    relay: &'a dyn Relay,
}

impl<'a> FirstPostFinder<'a> {
    pub fn new(relay: &'a dyn Relay) -> Self {
        Self { relay }
    }

    /// Most recent `kind` event by `pubkey` with `created_at <= until`.
    pub async fn query_latest_before(
        &self,
        pubkey: &str,
        kind: u32,
        until: u64,
    ) -> Result<Option<Event>, BotError> {
        self.relay
            .query(&Filter::latest(kind, pubkey).until(until))
            .await
    }

    /// Earliest `kind` event by `pubkey`, or `None` when the relay has none.
    pub async fn find(&self, pubkey: &str, kind: u32, now: u64) -> Result<Option<Event>, BotError> {
        let mut left = 0u64;
        let mut right = now;
        let mut best: Option<Event> = None;
        let mut probes = 0u32;

        while left <= right {
            let mid = left + (right - left) / 2;
            probes += 1;
            let found = self.query_latest_before(pubkey, kind, mid).await?;
            match found {
                // Nothing at or before `mid`, or the relay ignored `until`.
                None => left = mid + 1,
                Some(ev) if ev.created_at > mid => left = mid + 1,
                Some(ev) => {
                    if best.as_ref().map_or(true, |b| ev.created_at < b.created_at) {
                        best = Some(ev);
                    }
                    // An earlier event may still exist below `mid`.
                    match mid.checked_sub(1) {
                        Some(r) => right = r,
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(
            pubkey,
            kind,
            probes,
            found = best.as_ref().map(|e| e.created_at),
            "first post search finished"
        );
        Ok(best)
    }
}
