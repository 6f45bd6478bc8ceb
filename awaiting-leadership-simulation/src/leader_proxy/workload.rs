//! Workload phases for the leadership proxy simulation.
//!
//! - setup: build the election service and wrap the delegate factory
//! - start: run callers against the proxy under chaos, then close it
//! - check: verify invariants against the call records and final counters

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use awaiting_leadership::{AwaitingLeadershipProxy, ProxyConfig, ProxyError, QuorumRetry};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use super::chaos;
use super::types::{CallRecord, CallRecords, CheckResult, ChaosOp, DelegateLedger, Outcome, SimDelegate};
use super::ProxyWorkload;

/// How long the start phase waits for the last term before closing
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

fn call(proxy: &AwaitingLeadershipProxy<SimDelegate>) -> Outcome {
    match proxy.invoke(SimDelegate::handle) {
        Ok(generation) => Outcome::Served { generation },
        Err(ProxyError::NotCurrentLeader { .. }) => Outcome::NotLeader,
        Err(ProxyError::Closed) => Outcome::Closed,
        Err(ProxyError::Delegate(_)) => Outcome::Failed,
    }
}

fn drive_caller(
    caller: usize,
    calls: usize,
    interval: Duration,
    proxy: &AwaitingLeadershipProxy<SimDelegate>,
    closed: &AtomicBool,
) -> CallRecords {
    (0..calls)
        .map(|seq| {
            let after_close = closed.load(Ordering::SeqCst);
            let outcome = call(proxy);
            thread::sleep(interval);
            CallRecord {
                caller,
                seq,
                after_close,
                outcome,
            }
        })
        .collect()
}

impl ProxyWorkload {
    pub fn setup(&mut self) -> std::io::Result<()> {
        info!(
            seed = self.config.seed,
            callers = self.config.caller_count,
            construction_failure_rate = self.config.construction_failure_rate,
            "ProxyWorkloadSetup"
        );

        let ledger = self.ledger.clone();
        let proxy = AwaitingLeadershipProxy::with_config(
            move || DelegateLedger::create(&ledger),
            self.election.clone(),
            ProxyConfig::default()
                .with_worker_name(format!("sim-proxy-{}", self.config.seed))
                .with_quorum_retry(QuorumRetry::Yield)
                .with_delegate_retry_backoff(Duration::from_micros(100)),
        )?;
        self.proxy = Some(Arc::new(proxy));
        self.election.grant();
        Ok(())
    }

    pub fn start(&mut self) {
        let Some(proxy) = self.proxy.take() else {
            error!("ProxyWorkloadStart called before setup");
            return;
        };
        info!(
            calls_per_caller = self.config.calls_per_caller,
            chaos_operations = self.config.chaos_operations,
            "ProxyWorkloadStart"
        );

        let chaos = {
            let config = self.config.clone();
            let rng = SmallRng::from_rng(&mut self.rng);
            let election = self.election.clone();
            let ledger = self.ledger.clone();
            thread::spawn(move || chaos::run(&config, rng, election, ledger))
        };

        let callers: Vec<_> = (0..self.config.caller_count)
            .map(|caller| {
                let proxy = proxy.clone();
                let closed = self.closed.clone();
                let calls = self.config.calls_per_caller;
                let interval = self.config.call_interval;
                thread::spawn(move || drive_caller(caller, calls, interval, &proxy, &closed))
            })
            .collect();

        match chaos.join() {
            Ok(applied) => self.chaos_log = applied,
            Err(_) => error!("chaos thread panicked"),
        }
        self.settle(&proxy);

        proxy.close();
        self.closed.store(true, Ordering::SeqCst);
        let requests_at_close = self.election.acquisition_requests();
        info!(requests_at_close, "ProxyWorkloadClosed");

        for (caller, handle) in callers.into_iter().enumerate() {
            match handle.join() {
                Ok(records) => self.records.extend(records),
                Err(_) => error!(caller, "caller thread panicked"),
            }
        }

        let closer = self.config.caller_count;
        for seq in 0..self.config.post_close_calls {
            self.records.push(CallRecord {
                caller: closer,
                seq,
                after_close: true,
                outcome: call(&proxy),
            });
        }

        match Arc::try_unwrap(proxy) {
            Ok(proxy) => {
                let metrics = proxy.shutdown();
                // leadership coming back after shutdown must not be taken up
                chaos::apply(ChaosOp::Revoke, &self.election, &self.ledger);
                chaos::apply(ChaosOp::Grant, &self.election, &self.ledger);
                thread::sleep(self.config.chaos_interval);
                self.snapshot = Some(self.capture_snapshot(metrics, requests_at_close));
            }
            Err(_) => error!("proxy still shared after all callers joined"),
        }
    }

    /// Give the worker a chance to take up the term granted at the end of chaos
    fn settle(&self, proxy: &AwaitingLeadershipProxy<SimDelegate>) {
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        while !proxy.is_leading() {
            if Instant::now() >= deadline {
                warn!(state = ?proxy.state(), "proxy not leading before close");
                return;
            }
            // a loss is only noticed by a call
            let _ = call(proxy);
            thread::sleep(self.config.call_interval);
        }
    }

    pub fn check(&self) -> CheckResult {
        self.trace_check_start();

        let Some(snapshot) = &self.snapshot else {
            error!("ProxyWorkloadCheck called before a completed start phase");
            return CheckResult {
                passed: 0,
                failed: 1,
                results: vec![("RunCompleted", false, "no snapshot captured".to_string())],
            };
        };

        let stats = self.extract_caller_stats(&self.records);
        self.log_statistics(&stats, snapshot);

        let result = self.run_all_invariant_checks(&self.records, snapshot);
        for (name, pass, detail) in &result.results {
            if *pass {
                self.trace_invariant_pass(name, detail);
            } else {
                self.trace_invariant_fail(name, detail);
            }
        }
        self.trace_check_summary(result.passed, result.failed);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::WorkloadConfig;
    use super::*;

    fn small(seed: u64) -> WorkloadConfig {
        WorkloadConfig {
            caller_count: 3,
            calls_per_caller: 200,
            chaos_operations: 30,
            ..WorkloadConfig::with_seed(seed)
        }
    }

    #[test]
    fn run_passes_all_invariants() {
        crate::init_test_tracing();
        for seed in [1, 2, 3] {
            let result = ProxyWorkload::run(small(seed)).expect("worker thread");
            let failures: Vec<_> = result.failures().collect();
            assert!(result.is_success(), "seed {seed}: {failures:?}");
            assert_eq!(result.passed, 7);
        }
    }

    #[test]
    fn run_without_chaos_serves_every_call() {
        crate::init_test_tracing();
        let config = WorkloadConfig {
            chaos_operations: 0,
            construction_failure_rate: 0.0,
            ..small(9)
        };
        let mut workload = ProxyWorkload::new(config);
        workload.setup().expect("worker thread");
        let proxy = workload.proxy.clone().expect("proxy built");
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        while !proxy.is_leading() {
            assert!(Instant::now() < deadline, "never became leader");
            thread::sleep(Duration::from_millis(1));
        }
        drop(proxy);
        workload.start();

        assert!(workload.check().is_success());
        assert!(workload.records.iter().all(|r| match r.outcome {
            Outcome::Served { generation } => generation == 1,
            Outcome::Failed => false,
            Outcome::NotLeader | Outcome::Closed => true,
        }));
        let snapshot = workload.snapshot.as_ref().expect("snapshot");
        assert_eq!(snapshot.delegates_created, 1);
        assert_eq!(snapshot.metrics.leadership_losses, 0);
    }

    #[test]
    fn check_before_start_fails() {
        let workload = ProxyWorkload::new(small(0));
        let result = workload.check();
        assert!(!result.is_success());
        assert_eq!(result.results[0].0, "RunCompleted");
    }
}
