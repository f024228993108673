//! Prometheus-compatible metrics for the signaling service.
//!
//! Tracks socket churn, frames per event, and offer routing outcomes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter registry shared by the hub and the HTTP layer.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Sockets ever attached.
    sockets_opened_total: AtomicU64,
    /// Sockets detached.
    sockets_closed_total: AtomicU64,
    /// Offers forwarded to their target.
    offers_routed_total: AtomicU64,
    /// Offers rejected by the service itself.
    offers_rejected_total: AtomicU64,
    /// Answers that found no pending offer.
    answers_dropped_total: AtomicU64,
    /// Frames that could not be decoded.
    malformed_frames_total: AtomicU64,
    /// Inbound frames by event name.
    events: Mutex<BTreeMap<String, u64>>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                sockets_opened_total: AtomicU64::new(0),
                sockets_closed_total: AtomicU64::new(0),
                offers_routed_total: AtomicU64::new(0),
                offers_rejected_total: AtomicU64::new(0),
                answers_dropped_total: AtomicU64::new(0),
                malformed_frames_total: AtomicU64::new(0),
                events: Mutex::new(BTreeMap::new()),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_sockets_opened(&self) {
        self.inner
            .sockets_opened_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sockets_closed(&self) {
        self.inner
            .sockets_closed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_offers_routed(&self) {
        self.inner
            .offers_routed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_offers_rejected(&self) {
        self.inner
            .offers_rejected_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_answers_dropped(&self) {
        self.inner
            .answers_dropped_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed_frames(&self) {
        self.inner
            .malformed_frames_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inbound frame of `event`.
    pub fn record_event(&self, event: &str) {
        *self.inner.events.lock().entry(event.to_string()).or_default() += 1;
    }

    /// Inbound frames seen for `event`.
    pub fn event_count(&self, event: &str) -> u64 {
        self.inner.events.lock().get(event).copied().unwrap_or(0)
    }

    pub fn offers_routed(&self) -> u64 {
        self.inner.offers_routed_total.load(Ordering::Relaxed)
    }

    pub fn offers_rejected(&self) -> u64 {
        self.inner.offers_rejected_total.load(Ordering::Relaxed)
    }

    pub fn answers_dropped(&self) -> u64 {
        self.inner.answers_dropped_total.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        let mut out = format!(
            r#"# HELP webswarm_uptime_seconds Time since the service started.
# TYPE webswarm_uptime_seconds gauge
webswarm_uptime_seconds {}

# HELP webswarm_sockets_opened_total Signaling sockets attached.
# TYPE webswarm_sockets_opened_total counter
webswarm_sockets_opened_total {}

# HELP webswarm_sockets_closed_total Signaling sockets detached.
# TYPE webswarm_sockets_closed_total counter
webswarm_sockets_closed_total {}

# HELP webswarm_offers_routed_total Offers forwarded to their target.
# TYPE webswarm_offers_routed_total counter
webswarm_offers_routed_total {}

# HELP webswarm_offers_rejected_total Offers rejected by the service.
# TYPE webswarm_offers_rejected_total counter
webswarm_offers_rejected_total {}

# HELP webswarm_answers_dropped_total Answers without a pending offer.
# TYPE webswarm_answers_dropped_total counter
webswarm_answers_dropped_total {}

# HELP webswarm_malformed_frames_total Frames that failed to decode.
# TYPE webswarm_malformed_frames_total counter
webswarm_malformed_frames_total {}

# HELP webswarm_frames_total Inbound frames by event.
# TYPE webswarm_frames_total counter
"#,
            self.uptime_secs(),
            m.sockets_opened_total.load(Ordering::Relaxed),
            m.sockets_closed_total.load(Ordering::Relaxed),
            m.offers_routed_total.load(Ordering::Relaxed),
            m.offers_rejected_total.load(Ordering::Relaxed),
            m.answers_dropped_total.load(Ordering::Relaxed),
            m.malformed_frames_total.load(Ordering::Relaxed),
        );
        for (event, count) in m.events.lock().iter() {
            out.push_str(&format!(
                "webswarm_frames_total{{event=\"{event}\"}} {count}\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
