use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use awaiting_leadership::{BoxError, Delegate, ServiceNotAvailable};

/// Initialize tracing for tests
#[allow(unused)]
pub fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Poll `condition` until it holds, panicking after `timeout`
#[allow(unused)]
pub fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[allow(unused)]
pub const WAIT: Duration = Duration::from_secs(5);

/// Bookkeeping shared by every delegate a [`TrackedFactory`] builds
#[derive(Debug, Default)]
pub struct Ledger {
    pub created: AtomicUsize,
    pub create_attempts: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub failing_creates: AtomicUsize,
    pub failing_closes: AtomicBool,
}

impl Ledger {
    #[allow(unused)]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    #[allow(unused)]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    #[allow(unused)]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Delegate answering with its own id
#[derive(Debug)]
pub struct Tracked {
    pub id: usize,
    pub calls: AtomicU64,
    pub closed: AtomicBool,
    ledger: Arc<Ledger>,
}

impl Tracked {
    #[allow(unused)]
    pub fn serve(&self) -> Result<usize, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.id)
    }

    #[allow(unused)]
    pub fn unavailable(&self) -> Result<usize, BoxError> {
        Err(Box::new(ServiceNotAvailable::new(format!("delegate {}", self.id))))
    }

    #[allow(unused)]
    pub fn broken(&self) -> Result<usize, BoxError> {
        Err(Box::new(io::Error::new(io::ErrorKind::InvalidData, "bad request")))
    }
}

impl Delegate for Tracked {
    fn close(&self) -> Result<(), BoxError> {
        self.closed.store(true, Ordering::SeqCst);
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        if self.ledger.failing_closes.load(Ordering::SeqCst) {
            return Err(Box::new(io::Error::new(io::ErrorKind::Other, "close failed")));
        }
        Ok(())
    }
}

/// Factory numbering its delegates from 1
#[allow(unused)]
pub fn tracked_factory(ledger: Arc<Ledger>) -> impl Fn() -> Result<Tracked, BoxError> + Send + Sync {
    move || {
        ledger.create_attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = ledger
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Box::new(io::Error::new(io::ErrorKind::Other, "factory failed")) as BoxError);
        }

        let id = ledger.created.fetch_add(1, Ordering::SeqCst) + 1;
        let live = ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Tracked {
            id,
            calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ledger: ledger.clone(),
        })
    }
}
