// ============================
// livecollab-backend-lib/src/single_flight.rs
// ============================
//! Single-flight gate for the scrape job.
//!
//! At most one scrape runs process-wide. Requests arriving while one is in
//! flight are served the previous result (possibly stale, empty before the
//! first-ever completion) instead of launching duplicate work — a
//! deliberate latency-over-freshness trade-off, not a queue. The gate is
//! owned by the registry actor, so check-and-set happens atomically with
//! respect to its command loop, before the scrape's first suspension point.

use std::time::Instant;

use livecollab_common::MatchResults;

#[derive(Default)]
pub struct ScrapeGate {
    in_progress: bool,
    last_result: Option<MatchResults>,
    last_run: Option<Instant>,
}

impl ScrapeGate {
    /// Claim the gate. Returns false when a scrape is already in flight, in
    /// which case the caller must fall back to [`ScrapeGate::cached`].
    pub fn try_begin(&mut self) -> bool {
        if self.in_progress {
            return false;
        }
        self.in_progress = true;
        true
    }

    /// Record a completed scrape (success or fail-soft empty result) and
    /// release the gate.
    pub fn finish(&mut self, result: MatchResults) {
        self.last_result = Some(result);
        self.last_run = Some(Instant::now());
        self.in_progress = false;
    }

    /// The most recent completed result; empty before the first completion.
    pub fn cached(&self) -> MatchResults {
        self.last_result.clone().unwrap_or_default()
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }
}
