//! Trace helpers and statistics for the leadership proxy simulation.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use awaiting_leadership::MetricsReport;
use tracing::{error, info};

use super::types::{CallRecords, CallerStats, Outcome, RunSnapshot};
use super::ProxyWorkload;

impl ProxyWorkload {
    // ========================================================================
    // TRACE HELPERS
    // ========================================================================

    pub(crate) fn trace_check_start(&self) {
        info!(
            seed = self.config.seed,
            callers = self.config.caller_count,
            records = self.records.len(),
            chaos_operations = self.chaos_log.len(),
            "CheckPhaseStart"
        );
    }

    pub(crate) fn trace_invariant_pass(&self, name: &str, details: &str) {
        info!(invariant = name, details, "InvariantPassed");
    }

    pub(crate) fn trace_invariant_fail(&self, name: &str, details: &str) {
        error!(invariant = name, seed = self.config.seed, details, "InvariantFailed");
    }

    pub(crate) fn trace_check_summary(&self, passed: usize, failed: usize) {
        if failed > 0 {
            error!(passed, failed, total = passed + failed, "CheckPhaseSummary");
        } else {
            info!(passed, failed, total = passed + failed, "CheckPhaseSummary");
        }
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    pub(crate) fn extract_caller_stats(
        &self,
        records: &CallRecords,
    ) -> BTreeMap<usize, CallerStats> {
        let mut stats: BTreeMap<usize, CallerStats> = BTreeMap::new();
        for record in records {
            let entry = stats.entry(record.caller).or_default();
            match record.outcome {
                Outcome::Served { .. } => entry.served += 1,
                Outcome::NotLeader => entry.not_leader += 1,
                Outcome::Closed => entry.closed += 1,
                Outcome::Failed => entry.failed += 1,
            }
        }
        stats
    }

    pub(crate) fn log_statistics(
        &self,
        stats: &BTreeMap<usize, CallerStats>,
        snapshot: &RunSnapshot,
    ) {
        let metrics = &snapshot.metrics;
        info!(
            acquisitions = metrics.acquisitions,
            leadership_losses = metrics.leadership_losses,
            delegate_releases = metrics.delegate_releases,
            construction_failures = metrics.construction_failures,
            dispatched_calls = metrics.dispatched_calls,
            not_leader_rejections = metrics.not_leader_rejections,
            delegates_created = snapshot.delegates_created,
            "RunStatistics"
        );

        for (caller, s) in stats {
            info!(
                caller,
                served = s.served,
                not_leader = s.not_leader,
                closed = s.closed,
                failed = s.failed,
                "CallerStatistics"
            );
        }
    }

    /// Read the final counters once the proxy has shut down
    pub(crate) fn capture_snapshot(
        &self,
        metrics: MetricsReport,
        acquisition_requests_at_close: u64,
    ) -> RunSnapshot {
        RunSnapshot {
            metrics,
            delegates_created: self.ledger.created.load(Ordering::SeqCst),
            delegates_closed: self.ledger.closed.load(Ordering::SeqCst),
            construction_failures: self.ledger.construction_failures.load(Ordering::SeqCst),
            live_delegates: self.ledger.live.load(Ordering::SeqCst),
            max_live_delegates: self.ledger.max_live.load(Ordering::SeqCst),
            acquisition_requests_at_close,
            acquisition_requests_final: self.election.acquisition_requests(),
            quorum_checks: self.election.quorum_checks(),
        }
    }
}
