//! Per-channel candidate list.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use webswarm_core::Identity;

/// Remote identities last reported for a channel, plus the bookkeeping that
/// decides when the list must be fetched again.
#[derive(Debug, Clone)]
pub struct CandidateList {
    list: Vec<Identity>,
    attempts: u32,
    max_attempts: u32,
    /// Forces a refresh on the next lookup.
    lookup: bool,
    last_refresh: Option<Instant>,
}

impl CandidateList {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            list: Vec::new(),
            attempts: max_attempts,
            max_attempts,
            lookup: true,
            last_refresh: None,
        }
    }

    pub fn list(&self) -> Vec<Identity> {
        self.list.clone()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Failed connects still tolerated before a refresh is forced.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn lookup_pending(&self) -> bool {
        self.lookup
    }

    /// Whether a lookup at `now` should ask the signaling service.
    pub fn should_refresh(&self, now: Instant, debounce: Duration) -> bool {
        (self.lookup || self.list.is_empty())
            && self
                .last_refresh
                .is_none_or(|at| now.saturating_duration_since(at) >= debounce)
    }

    /// Claim the refresh. Concurrent lookups in the debounce window see the
    /// current list instead of issuing another request.
    pub fn begin_refresh(&mut self, now: Instant) {
        self.lookup = false;
        self.attempts = self.max_attempts;
        self.last_refresh = Some(now);
    }

    pub fn refresh_failed(&mut self) {
        self.lookup = true;
    }

    /// Install a fresh membership list. `local` is never a candidate.
    /// Returns true if the list changed.
    pub fn replace(&mut self, peers: Vec<Identity>, local: Identity, now: Instant) -> bool {
        let mut peers = peers;
        let mut seen = HashSet::new();
        peers.retain(|id| *id != local && seen.insert(*id));
        self.lookup = false;
        self.last_refresh = Some(now);
        if peers == self.list {
            return false;
        }
        self.list = peers;
        true
    }

    /// A connect to `remote` failed: drop it and spend one attempt.
    pub fn record_failure(&mut self, remote: &Identity) {
        self.list.retain(|id| id != remote);
        self.attempts = self.attempts.saturating_sub(1);
        if self.attempts == 0 || self.list.is_empty() {
            self.lookup = true;
        }
    }

    /// Force a refresh on the next lookup.
    pub fn invalidate(&mut self) {
        self.lookup = true;
    }
}
