//! Invariant verification methods for the leadership proxy simulation.
//!
//! 1. Single Live Delegate - at most one delegate alive at any time
//! 2. Per-Caller Term Monotonicity - served generations never go backwards per caller
//! 3. Served While Leading - served calls were checked and served by published delegates
//! 4. Loss Recovery Accounting - one loss, one release, one new acquisition
//! 5. No Service After Close - calls issued after close fail with `Closed`
//! 6. Close Is Terminal - no acquisition starts after close
//! 7. All Delegates Released - shutdown leaves no delegate open

use std::collections::BTreeMap;

use super::types::{CallRecords, CheckResult, Outcome, RunSnapshot};
use super::ProxyWorkload;

impl ProxyWorkload {
    /// Invariant 1: Single Live Delegate
    ///
    /// A new delegate is only built after the previous one was released.
    pub(crate) fn verify_single_live_delegate(&self, snapshot: &RunSnapshot) -> (bool, String) {
        if snapshot.max_live_delegates <= 1 {
            (
                true,
                format!(
                    "At most {} live delegate(s) across {} generations",
                    snapshot.max_live_delegates, snapshot.delegates_created
                ),
            )
        } else {
            (
                false,
                format!(
                    "{} delegates were alive at the same time",
                    snapshot.max_live_delegates
                ),
            )
        }
    }

    /// Invariant 2: Per-Caller Term Monotonicity
    ///
    /// Generations are published in order, so consecutive calls of one caller
    /// must never be served by an older generation than a previous call.
    pub(crate) fn verify_per_caller_term_monotonicity(
        &self,
        records: &CallRecords,
    ) -> (bool, String) {
        let mut last: BTreeMap<usize, (usize, u64)> = BTreeMap::new();
        let mut violations = Vec::new();

        for record in records {
            let Outcome::Served { generation } = record.outcome else {
                continue;
            };
            if let Some(&(seq, previous)) = last.get(&record.caller) {
                if generation < previous {
                    violations.push(format!(
                        "caller {} served by generation {previous} at call {seq} then {generation} at call {}",
                        record.caller, record.seq
                    ));
                }
            }
            last.insert(record.caller, (record.seq, generation));
        }

        if violations.is_empty() {
            (
                true,
                format!("Served generations monotonic for {} callers", last.len()),
            )
        } else {
            (
                false,
                format!(
                    "{} regressions: {}",
                    violations.len(),
                    violations.join("; ")
                ),
            )
        }
    }

    /// Invariant 3: Served While Leading
    ///
    /// Every dispatched call was preceded by at least one election check, and
    /// every served generation is one the factory actually built.
    pub(crate) fn verify_served_while_leading(
        &self,
        records: &CallRecords,
        snapshot: &RunSnapshot,
    ) -> (bool, String) {
        let dispatched = snapshot.metrics.dispatched_calls;
        let served: Vec<u64> = records
            .iter()
            .filter_map(|r| match r.outcome {
                Outcome::Served { generation } => Some(generation),
                _ => None,
            })
            .collect();
        let failed = records
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .count();

        let unknown = served
            .iter()
            .filter(|&&g| g == 0 || g > snapshot.delegates_created)
            .count();

        let mut problems = Vec::new();
        if served.len() as u64 > dispatched {
            problems.push(format!(
                "{} served calls but only {dispatched} dispatched",
                served.len()
            ));
        }
        if snapshot.quorum_checks < dispatched {
            problems.push(format!(
                "{dispatched} dispatched calls but only {} election checks",
                snapshot.quorum_checks
            ));
        }
        if unknown > 0 {
            problems.push(format!("{unknown} calls served by unknown generations"));
        }
        if failed > 0 {
            problems.push(format!("{failed} calls failed with a delegate error"));
        }

        if problems.is_empty() {
            (
                true,
                format!(
                    "{} served of {dispatched} dispatched, {} election checks",
                    served.len(),
                    snapshot.quorum_checks
                ),
            )
        } else {
            (false, problems.join("; "))
        }
    }

    /// Invariant 4: Loss Recovery Accounting
    ///
    /// Each lost term releases one delegate and queues one acquisition. Close
    /// may add one release (the serving delegate or one built while closing)
    /// and may swallow the submission of a loss that raced with it.
    pub(crate) fn verify_loss_recovery_accounting(&self, snapshot: &RunSnapshot) -> (bool, String) {
        let m = &snapshot.metrics;
        let losses = m.leadership_losses;

        let releases_ok = m.delegate_releases >= losses && m.delegate_releases <= losses + 1;
        let submissions_ok = m.acquisition_submissions >= losses.max(1)
            && m.acquisition_submissions <= losses + 1;
        let acquisitions_ok = m.acquisitions <= m.acquisition_submissions
            && losses <= m.acquisitions
            && (snapshot.delegates_created == m.acquisitions
                || snapshot.delegates_created == m.acquisitions + 1);
        let failures_ok = m.construction_failures == snapshot.construction_failures;
        // close may abandon the one wait in flight
        let interruptions_ok = m.interrupted_acquisitions <= 1;

        let detail = format!(
            "losses={losses}, releases={}, submissions={}, acquisitions={}, created={}, construction_failures={}/{}, interrupted={}",
            m.delegate_releases,
            m.acquisition_submissions,
            m.acquisitions,
            snapshot.delegates_created,
            m.construction_failures,
            snapshot.construction_failures,
            m.interrupted_acquisitions
        );

        if releases_ok && submissions_ok && acquisitions_ok && failures_ok && interruptions_ok {
            (true, format!("Accounting OK: {detail}"))
        } else {
            (false, format!("Accounting MISMATCH: {detail}"))
        }
    }

    /// Invariant 5: No Service After Close
    pub(crate) fn verify_no_service_after_close(&self, records: &CallRecords) -> (bool, String) {
        let after_close: Vec<_> = records.iter().filter(|r| r.after_close).collect();
        let served: Vec<_> = after_close
            .iter()
            .filter(|r| r.outcome != Outcome::Closed)
            .map(|r| format!("caller {} call {}: {:?}", r.caller, r.seq, r.outcome))
            .collect();

        if served.is_empty() {
            (
                true,
                format!("{} calls after close all failed with Closed", after_close.len()),
            )
        } else {
            (false, served.join("; "))
        }
    }

    /// Invariant 6: Close Is Terminal
    ///
    /// One attempt that passed its closed check before close may still reach
    /// the election service; nothing after that.
    pub(crate) fn verify_close_is_terminal(&self, snapshot: &RunSnapshot) -> (bool, String) {
        let at_close = snapshot.acquisition_requests_at_close;
        let at_end = snapshot.acquisition_requests_final;
        if at_end <= at_close + 1 {
            (
                true,
                format!("Acquisition requests: {at_close} at close, {at_end} after shutdown"),
            )
        } else {
            (
                false,
                format!(
                    "{} acquisition requests after close",
                    at_end - at_close
                ),
            )
        }
    }

    /// Invariant 7: All Delegates Released
    pub(crate) fn verify_all_delegates_released(&self, snapshot: &RunSnapshot) -> (bool, String) {
        let created = snapshot.delegates_created;
        let closed = snapshot.delegates_closed;
        if snapshot.live_delegates == 0 && created == closed {
            (true, format!("All {created} delegates closed"))
        } else {
            (
                false,
                format!(
                    "{created} created, {closed} closed, {} still live",
                    snapshot.live_delegates
                ),
            )
        }
    }

    pub(crate) fn run_all_invariant_checks(
        &self,
        records: &CallRecords,
        snapshot: &RunSnapshot,
    ) -> CheckResult {
        let mut results: Vec<(&'static str, bool, String)> = Vec::new();

        let (pass, detail) = self.verify_single_live_delegate(snapshot);
        results.push(("SingleLiveDelegate", pass, detail));

        let (pass, detail) = self.verify_per_caller_term_monotonicity(records);
        results.push(("PerCallerTermMonotonicity", pass, detail));

        let (pass, detail) = self.verify_served_while_leading(records, snapshot);
        results.push(("ServedWhileLeading", pass, detail));

        let (pass, detail) = self.verify_loss_recovery_accounting(snapshot);
        results.push(("LossRecoveryAccounting", pass, detail));

        let (pass, detail) = self.verify_no_service_after_close(records);
        results.push(("NoServiceAfterClose", pass, detail));

        let (pass, detail) = self.verify_close_is_terminal(snapshot);
        results.push(("CloseIsTerminal", pass, detail));

        let (pass, detail) = self.verify_all_delegates_released(snapshot);
        results.push(("AllDelegatesReleased", pass, detail));

        let passed = results.iter().filter(|(_, p, _)| *p).count();
        let failed = results.len() - passed;
        CheckResult {
            passed,
            failed,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{CallRecord, WorkloadConfig};
    use super::*;
    use awaiting_leadership::MetricsReport;

    fn workload() -> ProxyWorkload {
        ProxyWorkload::new(WorkloadConfig::default())
    }

    fn served(caller: usize, seq: usize, generation: u64) -> CallRecord {
        CallRecord {
            caller,
            seq,
            after_close: false,
            outcome: Outcome::Served { generation },
        }
    }

    /// Two terms: one lost, the second released on close
    fn clean_snapshot() -> RunSnapshot {
        RunSnapshot {
            metrics: MetricsReport {
                acquisitions: 2,
                acquisition_submissions: 2,
                leadership_losses: 1,
                delegate_releases: 2,
                dispatched_calls: 3,
                ..MetricsReport::default()
            },
            delegates_created: 2,
            delegates_closed: 2,
            construction_failures: 0,
            live_delegates: 0,
            max_live_delegates: 1,
            acquisition_requests_at_close: 2,
            acquisition_requests_final: 2,
            quorum_checks: 5,
        }
    }

    #[test]
    fn clean_run_passes() {
        let records = vec![served(0, 0, 1), served(1, 0, 1), served(0, 1, 2)];
        let result = workload().run_all_invariant_checks(&records, &clean_snapshot());
        assert!(result.is_success(), "{:?}", result.results);
        assert_eq!(result.passed, 7);
    }

    #[test]
    fn detects_generation_regression() {
        let records = vec![served(0, 0, 2), served(0, 1, 1), served(1, 0, 1)];
        let (pass, detail) = workload().verify_per_caller_term_monotonicity(&records);
        assert!(!pass);
        assert!(detail.contains("caller 0"), "{detail}");
    }

    #[test]
    fn detects_overlapping_delegates() {
        let snapshot = RunSnapshot {
            max_live_delegates: 2,
            ..clean_snapshot()
        };
        assert!(!workload().verify_single_live_delegate(&snapshot).0);
    }

    #[test]
    fn detects_double_recovery() {
        let mut snapshot = clean_snapshot();
        snapshot.metrics.acquisition_submissions = 3;
        assert!(!workload().verify_loss_recovery_accounting(&snapshot).0);

        let mut snapshot = clean_snapshot();
        snapshot.metrics.delegate_releases = 4;
        assert!(!workload().verify_loss_recovery_accounting(&snapshot).0);
    }

    #[test]
    fn detects_service_after_close() {
        let mut late = served(2, 7, 1);
        late.after_close = true;
        let (pass, detail) = workload().verify_no_service_after_close(&vec![late]);
        assert!(!pass);
        assert!(detail.contains("caller 2 call 7"));
    }

    #[test]
    fn detects_acquisitions_after_close() {
        let snapshot = RunSnapshot {
            acquisition_requests_final: 4,
            ..clean_snapshot()
        };
        assert!(!workload().verify_close_is_terminal(&snapshot).0);
    }

    #[test]
    fn detects_leaked_delegate() {
        let snapshot = RunSnapshot {
            delegates_closed: 1,
            live_delegates: 1,
            ..clean_snapshot()
        };
        assert!(!workload().verify_all_delegates_released(&snapshot).0);
    }

    #[test]
    fn detects_unchecked_dispatch() {
        let snapshot = RunSnapshot {
            quorum_checks: 1,
            ..clean_snapshot()
        };
        let records = vec![served(0, 0, 1)];
        assert!(!workload().verify_served_while_leading(&records, &snapshot).0);

        let records = vec![served(0, 0, 9)];
        let (pass, detail) = workload().verify_served_while_leading(&records, &clean_snapshot());
        assert!(!pass);
        assert!(detail.contains("unknown generations"));
    }
}
