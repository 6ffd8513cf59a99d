use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::PipelineId;

/// How long a fired notification suppresses another one for the same id.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(30 * 60);

/// Time-bounded record of ids that already triggered a notification.
///
/// Expiry is checked lazily on access; `expire_older_than` sweeps the rest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DedupLedger {
    entries: HashMap<PipelineId, Instant>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self, id: &PipelineId, now: Instant) -> bool {
        self.entries
            .get(id)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Records a notification for `id`; a second marking replaces the first.
    pub fn mark_fired(&mut self, id: PipelineId, now: Instant, ttl: Duration) {
        self.entries.insert(id, now + ttl);
    }

    pub fn clear(&mut self, id: &PipelineId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drops every entry whose expiry is at or before `now`; returns how many.
    pub fn expire_older_than(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    /// Presence regardless of expiry.
    pub fn contains(&self, id: &PipelineId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
