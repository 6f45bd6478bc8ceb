//! Leadership Proxy Simulation Workload
//!
//! Drives an [`AwaitingLeadershipProxy`] from several caller threads while a
//! chaos thread grants and revokes leadership, drops quorum for a few checks
//! and makes delegates signal leadership loss.
//!
//! # Check Phase Invariants
//!
//! 1. **Single Live Delegate**: at most one delegate exists at any time
//! 2. **Per-Caller Term Monotonicity**: a caller is never served by an older
//!    delegate generation after a newer one
//! 3. **Served While Leading**: every served call was checked with the
//!    election service and served by a published delegate
//! 4. **Loss Recovery Accounting**: one lost term means one release and one
//!    new acquisition, however many callers noticed
//! 5. **No Service After Close**: calls issued after close fail with `Closed`
//! 6. **Close Is Terminal**: no acquisition starts after close
//! 7. **All Delegates Released**: every delegate built was closed by shutdown

mod chaos;
mod helpers;
mod invariants;
mod types;
mod workload;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use awaiting_leadership::{AwaitingLeadershipProxy, InMemoryLeaderElection};
use rand::rngs::SmallRng;
use rand::SeedableRng;

pub use types::{CheckResult, WorkloadConfig};

use types::{CallRecords, ChaosOp, DelegateLedger, RunSnapshot, SimDelegate};

pub struct ProxyWorkload {
    pub(crate) config: WorkloadConfig,

    // Shared with the proxy
    pub(crate) election: Arc<InMemoryLeaderElection>,
    pub(crate) ledger: Arc<DelegateLedger>,
    pub(crate) proxy: Option<Arc<AwaitingLeadershipProxy<SimDelegate>>>,

    // State
    pub(crate) rng: SmallRng,
    pub(crate) closed: Arc<AtomicBool>,
    pub(crate) records: CallRecords,
    pub(crate) chaos_log: Vec<ChaosOp>,
    pub(crate) snapshot: Option<RunSnapshot>,
}

impl ProxyWorkload {
    pub fn new(config: WorkloadConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let ledger = DelegateLedger::new(
            config.construction_failure_rate,
            SmallRng::from_rng(&mut rng),
        );

        Self {
            election: Arc::new(InMemoryLeaderElection::new()),
            ledger: Arc::new(ledger),
            proxy: None,
            rng,
            closed: Arc::new(AtomicBool::new(false)),
            records: Vec::new(),
            chaos_log: Vec::new(),
            snapshot: None,
            config,
        }
    }

    /// Run all three phases and return the invariant check results
    ///
    /// # Errors
    /// Fails only if the proxy's worker thread cannot be spawned.
    pub fn run(config: WorkloadConfig) -> std::io::Result<CheckResult> {
        let mut workload = Self::new(config);
        workload.setup()?;
        workload.start();
        Ok(workload.check())
    }
}
