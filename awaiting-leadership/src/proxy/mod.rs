// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Leadership-gated proxy
//!
//! [`AwaitingLeadershipProxy`] routes calls to the delegate owned by the
//! current leadership term of this process.
//!
//! # State
//!
//! Two independent lock-free cells are shared between the acquisition worker
//! and every calling thread:
//!
//! - the **token** of the current term (absent while not leading)
//! - the **delegate** built for that term (absent while not leading)
//!
//! The worker publishes the delegate first and the token second, so a caller
//! that sees a token also sees its delegate. The token is cleared with a
//! compare-and-swap, which makes exactly one caller responsible for each
//! lost term: it releases the delegate and queues one new acquisition.
//!
//! # Threads
//!
//! All blocking happens on one dedicated worker thread that waits for
//! leadership and builds delegates. Callers never wait for it; while the
//! proxy is not leading they are refused with
//! [`ProxyError::NotCurrentLeader`](crate::ProxyError::NotCurrentLeader).

mod acquisition;
mod dispatch;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::AbortHandle;
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::delegate::{Delegate, DelegateFactory, DelegateSlot};
use crate::election::LeaderElectionService;
use crate::metrics::{MetricsReport, ProxyMetrics};
use crate::token::LeadershipToken;

/// Externally visible state of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// No term is held; calls are refused (possibly acquiring in the background)
    NotLeading,
    /// Serving calls for the term with this ballot
    Leading { ballot: u64 },
    /// Closed for good
    Closed,
}

/// State shared by the proxy handle and its acquisition worker
pub(crate) struct Shared<T> {
    factory: Box<dyn DelegateFactory<T>>,
    election: Box<dyn LeaderElectionService>,
    config: ProxyConfig,
    token: ArcSwapOption<LeadershipToken>,
    delegate: DelegateSlot<T>,
    closed: AtomicBool,
    jobs: UnboundedSender<()>,
    stop: AbortHandle,
    metrics: ProxyMetrics,
}

impl<T: Delegate> Shared<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue one acquisition attempt on the worker
    fn submit_acquisition(&self) {
        match self.jobs.unbounded_send(()) {
            Ok(()) => self.metrics.record_submission(),
            Err(_) if self.is_closed() => {
                debug!("acquisition not submitted, proxy closed");
            }
            Err(_) => error!("failed to submit acquisition but proxy not closed"),
        }
    }

    /// Leadership-loss transition for `token`
    ///
    /// Only the caller whose compare-and-swap clears `token` releases the
    /// delegate and queues the next acquisition; everybody else observing the
    /// same stale term does nothing.
    fn mark_as_not_leading(&self, token: &Arc<LeadershipToken>) {
        let previous = self
            .token
            .compare_and_swap(token, None::<Arc<LeadershipToken>>);
        let cleared = matches!(&*previous, Some(current) if Arc::ptr_eq(current, token));
        if !cleared {
            return;
        }

        self.metrics.record_leadership_loss();
        info!(ballot = token.ballot(), "lost leadership");
        self.delegate.clear(&self.metrics);
        if !self.is_closed() {
            self.submit_acquisition();
        }
    }
}

/// Proxy that serves calls only while this process holds leadership
///
/// Build it with [`AwaitingLeadershipProxy::wrap`]: the first acquisition is
/// queued before `wrap` returns. Every call goes through
/// [`invoke`](AwaitingLeadershipProxy::invoke). To expose a service trait,
/// implement the trait on a thin adapter that forwards each method through
/// `invoke`:
///
/// ```
/// use awaiting_leadership::{
///     AwaitingLeadershipProxy, BoxError, Delegate, InMemoryLeaderElection, ProxyError,
///     ServiceNotAvailable,
/// };
///
/// trait Timestamps {
///     fn fresh_timestamp(&self) -> Result<u64, ProxyError<ServiceNotAvailable>>;
/// }
///
/// struct LocalTimestamps;
/// impl Delegate for LocalTimestamps {}
///
/// struct LeaderTimestamps(AwaitingLeadershipProxy<LocalTimestamps>);
///
/// impl Timestamps for LeaderTimestamps {
///     fn fresh_timestamp(&self) -> Result<u64, ProxyError<ServiceNotAvailable>> {
///         self.0.invoke(|_local| Ok(42))
///     }
/// }
///
/// let proxy = AwaitingLeadershipProxy::wrap(
///     || -> Result<LocalTimestamps, BoxError> { Ok(LocalTimestamps) },
///     InMemoryLeaderElection::new(),
/// )
/// .expect("worker thread");
/// let service = LeaderTimestamps(proxy);
///
/// // leadership was never granted
/// assert!(service.fresh_timestamp().unwrap_err().is_not_current_leader());
/// ```
///
/// Dropping the proxy closes it.
pub struct AwaitingLeadershipProxy<T: Delegate> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Delegate> AwaitingLeadershipProxy<T> {
    /// Wrap a delegate factory with the default [`ProxyConfig`]
    ///
    /// # Errors
    /// Fails only if the worker thread cannot be spawned.
    pub fn wrap<F, S>(factory: F, election: S) -> io::Result<Self>
    where
        F: DelegateFactory<T> + 'static,
        S: LeaderElectionService + 'static,
    {
        Self::with_config(factory, election, ProxyConfig::default())
    }

    /// Wrap a delegate factory with a custom configuration
    ///
    /// # Errors
    /// Fails only if the worker thread cannot be spawned.
    pub fn with_config<F, S>(factory: F, election: S, config: ProxyConfig) -> io::Result<Self>
    where
        F: DelegateFactory<T> + 'static,
        S: LeaderElectionService + 'static,
    {
        let (jobs, queue) = mpsc::unbounded();
        let (stop, registration) = AbortHandle::new_pair();
        let shared = Arc::new(Shared {
            factory: Box::new(factory),
            election: Box::new(election),
            config,
            token: ArcSwapOption::empty(),
            delegate: DelegateSlot::empty(),
            closed: AtomicBool::new(false),
            jobs,
            stop,
            metrics: ProxyMetrics::default(),
        });

        let worker = acquisition::spawn(shared.clone(), queue, registration)?;
        shared.submit_acquisition();
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Close the proxy for good
    ///
    /// Stops the worker (an in-flight wait for leadership is abandoned),
    /// releases the delegate and refuses every later call with
    /// [`ProxyError::Closed`](crate::ProxyError::Closed). Idempotent; never blocks.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(ballot = ?self.current_ballot(), "closing proxy");
        self.shared.stop.abort();
        self.shared.jobs.close_channel();
        self.shared.token.store(None);
        self.shared.delegate.clear(&self.shared.metrics);
    }

    /// Close the proxy and wait for the worker thread to exit
    ///
    /// Returns the final counters; nothing updates them afterwards.
    pub fn shutdown(mut self) -> MetricsReport {
        self.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("acquisition worker panicked");
            }
        }
        self.metrics()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// `true` while a term is held and the proxy is open
    pub fn is_leading(&self) -> bool {
        !self.is_closed() && self.shared.token.load().is_some()
    }

    /// Ballot of the term currently held, if any
    pub fn current_ballot(&self) -> Option<u64> {
        self.shared.token.load_full().map(|token| token.ballot())
    }

    pub fn state(&self) -> ProxyState {
        if self.is_closed() {
            return ProxyState::Closed;
        }
        match self.current_ballot() {
            Some(ballot) => ProxyState::Leading { ballot },
            None => ProxyState::NotLeading,
        }
    }

    pub fn metrics(&self) -> MetricsReport {
        self.shared.metrics.snapshot()
    }
}

impl<T: Delegate> Drop for AwaitingLeadershipProxy<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Delegate> fmt::Debug for AwaitingLeadershipProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitingLeadershipProxy")
            .field("delegate_type", &std::any::type_name::<T>())
            .field("worker", &self.shared.config.worker_name)
            .field("token", &self.shared.token.load().as_deref())
            .field("has_delegate", &self.shared.delegate.is_present())
            .field("is_closed", &self.is_closed())
            .field("is_leading", &self.is_leading())
            .finish()
    }
}
