//! Chaos operations against the election service and the delegates.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use awaiting_leadership::InMemoryLeaderElection;
use rand::rngs::SmallRng;
use rand::Rng;
use tracing::debug;

use super::types::{ChaosOp, DelegateLedger, WorkloadConfig};

/// Relative weights of Grant, Revoke, QuorumBlip, SignalLoss and Pause
const WEIGHTS: [u32; 5] = [3, 2, 2, 2, 1];

/// Most `NoQuorum` answers a single blip injects
const MAX_QUORUM_BLIP: u64 = 5;

pub(crate) fn pick(rng: &mut SmallRng) -> ChaosOp {
    let total: u32 = WEIGHTS.iter().sum();
    let mut roll = rng.random_range(0..total);
    let mut index = 0;
    while roll >= WEIGHTS[index] {
        roll -= WEIGHTS[index];
        index += 1;
    }

    match index {
        0 => ChaosOp::Grant,
        1 => ChaosOp::Revoke,
        2 => ChaosOp::QuorumBlip(rng.random_range(1..=MAX_QUORUM_BLIP)),
        3 => ChaosOp::SignalLoss,
        _ => ChaosOp::Pause,
    }
}

pub(crate) fn apply(op: ChaosOp, election: &InMemoryLeaderElection, ledger: &DelegateLedger) {
    match op {
        ChaosOp::Grant => election.grant(),
        ChaosOp::Revoke => election.revoke(),
        ChaosOp::QuorumBlip(checks) => election.fail_quorum_checks(checks),
        ChaosOp::SignalLoss => ledger.signal_loss.store(true, Ordering::SeqCst),
        ChaosOp::Pause => {}
    }
    debug!(op = op.as_str(), ballot = ?election.current_ballot(), "chaos");
}

/// Apply `config.chaos_operations` random operations, then grant leadership
/// back so the run ends with a term available
pub(crate) fn run(
    config: &WorkloadConfig,
    mut rng: SmallRng,
    election: Arc<InMemoryLeaderElection>,
    ledger: Arc<DelegateLedger>,
) -> Vec<ChaosOp> {
    let mut applied = Vec::with_capacity(config.chaos_operations + 1);
    for _ in 0..config.chaos_operations {
        let op = pick(&mut rng);
        apply(op, &election, &ledger);
        applied.push(op);
        let pause = if op == ChaosOp::Pause { 5 } else { 1 };
        thread::sleep(config.chaos_interval * pause);
    }
    apply(ChaosOp::Grant, &election, &ledger);
    applied.push(ChaosOp::Grant);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn pick_covers_every_operation() {
        let mut rng = SmallRng::seed_from_u64(7);
        let ops: Vec<_> = (0..1_000).map(|_| pick(&mut rng)).collect();

        for name in ["Grant", "Revoke", "QuorumBlip", "SignalLoss", "Pause"] {
            assert!(
                ops.iter().any(|op| op.as_str() == name),
                "{name} never picked"
            );
        }
        assert!(ops.iter().all(|op| match op {
            ChaosOp::QuorumBlip(n) => (1..=MAX_QUORUM_BLIP).contains(n),
            _ => true,
        }));
    }

    #[test]
    fn apply_drives_the_election() {
        let election = InMemoryLeaderElection::new();
        let ledger = DelegateLedger::new(0.0, SmallRng::seed_from_u64(0));

        apply(ChaosOp::Grant, &election, &ledger);
        assert!(election.is_available());
        apply(ChaosOp::Revoke, &election, &ledger);
        assert!(!election.is_available());

        apply(ChaosOp::SignalLoss, &election, &ledger);
        assert!(ledger.signal_loss.load(Ordering::SeqCst));
    }
}
