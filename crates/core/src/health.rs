//! Operational health surface shared by every component.
//!
//! A small serializable status struct each component updates as it runs,
//! read back by a liveness/readiness endpoint.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

/// Tracks "did the last cycle/consume complete within N× its period" for one
/// component, using an atomic timestamp so the health check never blocks the
/// component's own loop.
#[derive(Clone)]
pub struct Heartbeat {
    last_success_ms: Arc<AtomicI64>,
    period_seconds: u64,
}

impl Heartbeat {
    pub fn new(period_seconds: u64) -> Self {
        Self {
            last_success_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
            period_seconds,
        }
    }

    pub fn beat(&self) {
        self.last_success_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Alive iff the last beat landed within `tolerance` periods.
    pub fn is_alive(&self, tolerance: u32) -> bool {
        let last = self.last_success_ms.load(Ordering::Relaxed);
        let age_ms = Utc::now().timestamp_millis() - last;
        let budget_ms = (self.period_seconds as i64) * (tolerance as i64) * 1000;
        age_ms <= budget_ms
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub component: String,
    pub live: bool,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_alive_right_after_construction() {
        let hb = Heartbeat::new(15);
        assert!(hb.is_alive(3));
    }

    #[test]
    fn heartbeat_respects_tolerance_multiplier() {
        let hb = Heartbeat::new(0);
        hb.beat();
        assert!(hb.is_alive(1));
    }
}
