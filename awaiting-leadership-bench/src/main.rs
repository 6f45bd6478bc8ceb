use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use awaiting_leadership::{
    AwaitingLeadershipProxy, BoxError, Delegate, InMemoryLeaderElection, LeaderElectionError,
    LeaderElectionService, LeadershipToken, ProxyConfig, ProxyError, QuorumRetry,
    ServiceNotAvailable, StillLeadingStatus,
};
use log::*;
use structopt::StructOpt;

/// Service benchmarked through the proxy
trait SequenceService {
    fn next_sequence(&self) -> Result<u64, ProxyError<ServiceNotAvailable>>;
}

#[derive(Default)]
struct LocalSequence {
    next: AtomicU64,
}

impl Delegate for LocalSequence {}

struct LeaderSequence(AwaitingLeadershipProxy<LocalSequence>);

impl SequenceService for LeaderSequence {
    fn next_sequence(&self) -> Result<u64, ProxyError<ServiceNotAvailable>> {
        self.0
            .invoke(|local| Ok(local.next.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Election answering `NoQuorum` to a random share of checks
struct FlakyQuorum {
    inner: Arc<InMemoryLeaderElection>,
    no_quorum_rate: f64,
}

#[async_trait]
impl LeaderElectionService for FlakyQuorum {
    async fn block_on_becoming_leader(&self) -> Result<LeadershipToken, LeaderElectionError> {
        self.inner.block_on_becoming_leader().await
    }

    fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus {
        if self.no_quorum_rate > 0.0 && rand::random_bool(self.no_quorum_rate) {
            return StillLeadingStatus::NoQuorum;
        }
        self.inner.is_still_leading(token)
    }
}

#[derive(Clone)]
struct Counter {
    served: Arc<AtomicU64>,
    refused: Arc<AtomicU64>,
}

impl Counter {
    fn new() -> Self {
        Self {
            served: Arc::new(AtomicU64::new(0)),
            refused: Arc::new(AtomicU64::new(0)),
        }
    }
}

struct Bench {
    service: Arc<LeaderSequence>,
    election: Arc<InMemoryLeaderElection>,
    opt: Opt,
}

impl Bench {
    fn run(self) {
        let counter = Counter::new();
        let done = Arc::new(AtomicBool::new(false));

        let churn = (self.opt.churn_ms > 0).then(|| {
            let election = self.election.clone();
            let done = done.clone();
            let period = Duration::from_millis(self.opt.churn_ms);
            thread::spawn(move || {
                let mut terms = 0u64;
                while !done.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    election.revoke();
                    thread::sleep(Duration::from_millis(1));
                    election.grant();
                    terms += 1;
                }
                terms
            })
        });

        let start = Instant::now();
        let handles: Vec<_> = (0..self.opt.threads)
            .map(|_| {
                let service = self.service.clone();
                let counter = counter.clone();
                let calls = self.opt.calls;
                thread::spawn(move || {
                    for _ in 0..calls {
                        match service.next_sequence() {
                            Ok(_) => counter.served.fetch_add(1, Ordering::Relaxed),
                            Err(_) => counter.refused.fetch_add(1, Ordering::Relaxed),
                        };
                    }
                })
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                error!("bench thread panicked");
            }
        }
        let elapsed = start.elapsed();
        done.store(true, Ordering::SeqCst);

        let terms = match churn.map(|handle| handle.join()) {
            Some(Ok(terms)) => terms,
            Some(Err(_)) => {
                error!("churn thread panicked");
                0
            }
            None => 0,
        };

        let served = counter.served.load(Ordering::SeqCst);
        let refused = counter.refused.load(Ordering::SeqCst);
        let total = served + refused;
        info!(
            "bench finished: {} calls in {:?} ({:.0} calls/s), {} served, {} refused, {} forced term changes",
            total,
            elapsed,
            total as f64 / elapsed.as_secs_f64(),
            served,
            refused,
            terms
        );

        let metrics = self.service.0.metrics();
        info!("proxy metrics: {:?}", metrics);
    }
}

#[derive(StructOpt, Debug, Clone)]
#[structopt(name = "awaiting-leadership-bench")]
struct Opt {
    /// Number of calling threads
    #[structopt(short = "t", long = "threads", default_value = "4")]
    threads: usize,

    /// Calls per thread
    #[structopt(short = "c", long = "calls", default_value = "100000")]
    calls: usize,

    /// Revoke and regrant leadership every N ms (0 disables churn)
    #[structopt(long = "churn-ms", default_value = "0")]
    churn_ms: u64,

    /// Share of leadership checks answering NoQuorum
    #[structopt(long = "no-quorum-rate", default_value = "0")]
    no_quorum_rate: f64,

    /// Yield instead of spinning while quorum is lost
    #[structopt(long = "yield-on-no-quorum")]
    yield_on_no_quorum: bool,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();
    info!("opt: {:?}", opt);

    if !(0.0..1.0).contains(&opt.no_quorum_rate) {
        error!("--no-quorum-rate must be in [0, 1)");
        process::exit(2);
    }

    let election = Arc::new(InMemoryLeaderElection::granted());
    let quorum_retry = if opt.yield_on_no_quorum {
        QuorumRetry::Yield
    } else {
        QuorumRetry::Spin
    };
    let proxy = AwaitingLeadershipProxy::with_config(
        || -> Result<LocalSequence, BoxError> { Ok(LocalSequence::default()) },
        FlakyQuorum {
            inner: election.clone(),
            no_quorum_rate: opt.no_quorum_rate,
        },
        ProxyConfig::default()
            .with_worker_name("bench-acquisition")
            .with_quorum_retry(quorum_retry),
    );
    let proxy = match proxy {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("failed to start acquisition worker: {}", e);
            process::exit(1);
        }
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !proxy.is_leading() {
        if Instant::now() > deadline {
            error!("never became leader");
            process::exit(1);
        }
        thread::sleep(Duration::from_millis(1));
    }

    let bench = Bench {
        service: Arc::new(LeaderSequence(proxy)),
        election,
        opt,
    };
    bench.run();
}
