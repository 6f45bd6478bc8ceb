//! Types and configuration for the leadership proxy simulation workload.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use awaiting_leadership::{BoxError, Delegate, MetricsReport, ServiceNotAvailable};
use rand::rngs::SmallRng;
use rand::Rng;

/// Knobs of one simulation run
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Number of caller threads
    pub caller_count: usize,
    /// Calls issued by every caller
    pub calls_per_caller: usize,
    /// Chaos operations applied while callers run
    pub chaos_operations: usize,
    /// Pause between two chaos operations
    pub chaos_interval: Duration,
    /// Pause between two calls of one caller
    pub call_interval: Duration,
    /// Probability in `[0, 1]` that building a delegate fails
    pub construction_failure_rate: f64,
    /// Calls issued once the proxy is closed
    pub post_close_calls: usize,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            caller_count: 4,
            calls_per_caller: 500,
            chaos_operations: 50,
            chaos_interval: Duration::from_millis(1),
            call_interval: Duration::from_micros(100),
            construction_failure_rate: 0.2,
            post_close_calls: 10,
            seed: 0,
        }
    }
}

impl WorkloadConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// Chaos operations applied to the election service and delegates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChaosOp {
    /// Make leadership available again
    Grant,
    /// End the current term
    Revoke,
    /// Answer `NoQuorum` to the next few checks
    QuorumBlip(u64),
    /// Make the next served call fail with a leadership-loss error
    SignalLoss,
    /// Let the callers run undisturbed for a while
    Pause,
}

impl ChaosOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ChaosOp::Grant => "Grant",
            ChaosOp::Revoke => "Revoke",
            ChaosOp::QuorumBlip(_) => "QuorumBlip",
            ChaosOp::SignalLoss => "SignalLoss",
            ChaosOp::Pause => "Pause",
        }
    }
}

/// What one call through the proxy returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Served by the delegate with this generation
    Served { generation: u64 },
    NotLeader,
    Closed,
    /// Delegate error that does not signal loss; never produced by [`SimDelegate`]
    Failed,
}

/// A call as seen by one caller
#[derive(Clone, Copy, Debug)]
pub(crate) struct CallRecord {
    pub caller: usize,
    pub seq: usize,
    /// The caller had already observed the proxy closed before calling
    pub after_close: bool,
    pub outcome: Outcome,
}

/// Call records of all callers, each caller's calls in issue order
pub(crate) type CallRecords = Vec<CallRecord>;

/// State captured after the run, for invariant checking
#[derive(Debug, Clone)]
pub(crate) struct RunSnapshot {
    pub(crate) metrics: MetricsReport,
    pub(crate) delegates_created: u64,
    pub(crate) delegates_closed: u64,
    pub(crate) construction_failures: u64,
    pub(crate) live_delegates: usize,
    pub(crate) max_live_delegates: usize,
    pub(crate) acquisition_requests_at_close: u64,
    pub(crate) acquisition_requests_final: u64,
    pub(crate) quorum_checks: u64,
}

/// Result of running all invariant checks
#[derive(Debug, Default)]
pub struct CheckResult {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<(&'static str, bool, String)>,
}

impl CheckResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.results
            .iter()
            .filter(|(_, pass, _)| !*pass)
            .map(|(name, _, detail)| (*name, detail.as_str()))
    }
}

/// Per-caller statistics extracted from call records
#[derive(Default, Debug)]
pub(crate) struct CallerStats {
    pub(crate) served: usize,
    pub(crate) not_leader: usize,
    pub(crate) closed: usize,
    pub(crate) failed: usize,
}

/// Bookkeeping shared by the delegate factory and every delegate it built
#[derive(Debug)]
pub(crate) struct DelegateLedger {
    pub(crate) created: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) live: AtomicUsize,
    pub(crate) max_live: AtomicUsize,
    pub(crate) construction_failures: AtomicU64,
    /// Set by chaos, consumed by the next served call
    pub(crate) signal_loss: AtomicBool,
    failure_rate: f64,
    rng: Mutex<SmallRng>,
}

impl DelegateLedger {
    pub(crate) fn new(failure_rate: f64, rng: SmallRng) -> Self {
        Self {
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            construction_failures: AtomicU64::new(0),
            signal_loss: AtomicBool::new(false),
            failure_rate,
            rng: Mutex::new(rng),
        }
    }

    fn should_fail(&self) -> bool {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        rng.random_bool(self.failure_rate.clamp(0.0, 1.0))
    }

    /// Factory body: build the next delegate generation
    pub(crate) fn create(ledger: &Arc<Self>) -> Result<SimDelegate, BoxError> {
        if ledger.should_fail() {
            ledger.construction_failures.fetch_add(1, Ordering::SeqCst);
            return Err(Box::new(ServiceNotAvailable::new("delegate backend")));
        }
        let generation = ledger.created.fetch_add(1, Ordering::SeqCst) + 1;
        let live = ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(SimDelegate {
            generation,
            ledger: ledger.clone(),
        })
    }
}

/// Delegate answering with its generation number
#[derive(Debug)]
pub(crate) struct SimDelegate {
    pub(crate) generation: u64,
    ledger: Arc<DelegateLedger>,
}

impl SimDelegate {
    pub(crate) fn handle(&self) -> Result<u64, BoxError> {
        if self.ledger.signal_loss.swap(false, Ordering::SeqCst) {
            return Err(Box::new(ServiceNotAvailable::new(format!(
                "generation {}",
                self.generation
            ))));
        }
        Ok(self.generation)
    }
}

impl Delegate for SimDelegate {
    fn close(&self) -> Result<(), BoxError> {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
