//! Simulation workloads for the awaiting-leadership proxy
//!
//! This crate drives a leadership-gated proxy from many threads while
//! leadership is granted, revoked and lost under it, then checks that the
//! proxy kept its guarantees.
//!
//! ```no_run
//! use awaiting_leadership_simulation::{ProxyWorkload, WorkloadConfig};
//!
//! let result = ProxyWorkload::run(WorkloadConfig::with_seed(42)).expect("worker thread");
//! for (name, detail) in result.failures() {
//!     eprintln!("{name}: {detail}");
//! }
//! assert!(result.is_success());
//! ```

mod leader_proxy;

pub use leader_proxy::{CheckResult, ProxyWorkload, WorkloadConfig};

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}
