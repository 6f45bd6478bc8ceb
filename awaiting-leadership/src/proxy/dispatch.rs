// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-call dispatch
//!
//! Runs on the calling thread and never waits for the acquisition worker.

use super::{AwaitingLeadershipProxy, Shared};
use crate::delegate::Delegate;
use crate::error::{LeadershipSignal, NotLeadingReason, ProxyError};
use crate::token::{LeadershipToken, StillLeadingStatus};

impl<T: Delegate> Shared<T> {
    /// Ask the election service until it gives an authoritative answer
    ///
    /// Returns `NoQuorum` only if the proxy was closed while retrying.
    fn poll_leadership(&self, token: &LeadershipToken) -> StillLeadingStatus {
        loop {
            match self.election.is_still_leading(token) {
                StillLeadingStatus::NoQuorum if self.is_closed() => {
                    return StillLeadingStatus::NoQuorum
                }
                StillLeadingStatus::NoQuorum => self.config.quorum_retry.pause(),
                status => return status,
            }
        }
    }

    fn refuse<E>(&self, reason: NotLeadingReason) -> ProxyError<E> {
        self.metrics.record_not_leader_rejection();
        ProxyError::not_leading(reason)
    }
}

impl<T: Delegate> AwaitingLeadershipProxy<T> {
    /// Run `call` against the delegate of the current term
    ///
    /// # Errors
    /// - [`ProxyError::Closed`] once [`close`](Self::close) has been called
    /// - [`ProxyError::NotCurrentLeader`] if no term is held, if the election
    ///   service reports the term as over, or if `call` fails with an error
    ///   that [signals leadership loss](LeadershipSignal) (kept as `cause`)
    /// - [`ProxyError::Delegate`] for any other error of `call`, unchanged
    ///
    /// The last two cases that observe a lost term end it: the delegate is
    /// released and a new acquisition is queued, once per term however many
    /// callers notice.
    pub fn invoke<R, E, F>(&self, call: F) -> Result<R, ProxyError<E>>
    where
        F: FnOnce(&T) -> Result<R, E>,
        E: LeadershipSignal,
    {
        let shared = &*self.shared;
        if shared.is_closed() {
            return Err(ProxyError::Closed);
        }

        let Some(token) = shared.token.load_full() else {
            return Err(shared.refuse(NotLeadingReason::NoTerm));
        };
        let delegate = shared.delegate.load();

        if shared.poll_leadership(&token) == StillLeadingStatus::NotLeading {
            shared.mark_as_not_leading(&token);
            return Err(shared.refuse(NotLeadingReason::LeadershipLost));
        }

        if shared.is_closed() {
            return Err(ProxyError::Closed);
        }

        // Cleared by another caller's loss transition after the token was read
        let Some(delegate) = delegate else {
            return Err(shared.refuse(NotLeadingReason::LeadershipLost));
        };

        shared.metrics.record_dispatch();
        match call(&*delegate) {
            Ok(value) => Ok(value),
            Err(e) if e.signals_leadership_loss() => {
                shared.mark_as_not_leading(&token);
                shared.metrics.record_not_leader_rejection();
                Err(ProxyError::NotCurrentLeader {
                    reason: NotLeadingReason::LossSignalled,
                    cause: Some(e),
                })
            }
            Err(e) => Err(ProxyError::Delegate(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, QuorumRetry};
    use crate::election::InMemoryLeaderElection;
    use crate::error::{BoxError, ServiceNotAvailable};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Echo;
    impl Delegate for Echo {}

    fn echo_factory() -> Result<Echo, BoxError> {
        Ok(Echo)
    }

    fn wait_for_leadership(proxy: &AwaitingLeadershipProxy<Echo>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !proxy.is_leading() {
            assert!(Instant::now() < deadline, "proxy never gained leadership");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn refuses_before_first_term() {
        let proxy = AwaitingLeadershipProxy::wrap(echo_factory, InMemoryLeaderElection::new())
            .expect("worker");
        let err = proxy
            .invoke(|_| Ok::<_, ServiceNotAvailable>(1))
            .unwrap_err();
        assert_eq!(err.reason(), Some(NotLeadingReason::NoTerm));
        assert_eq!(proxy.metrics().not_leader_rejections, 1);
    }

    #[test]
    fn closed_wins_over_missing_token() {
        let proxy = AwaitingLeadershipProxy::wrap(echo_factory, InMemoryLeaderElection::new())
            .expect("worker");
        proxy.close();
        let err = proxy
            .invoke(|_| Ok::<_, ServiceNotAvailable>(1))
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn close_breaks_a_quorum_spin() {
        let election = Arc::new(InMemoryLeaderElection::granted());
        let proxy = Arc::new(
            AwaitingLeadershipProxy::with_config(
                echo_factory,
                election.clone(),
                ProxyConfig::default().with_quorum_retry(QuorumRetry::Yield),
            )
            .expect("worker"),
        );
        wait_for_leadership(&proxy);
        election.set_quorum_available(false);

        let caller = {
            let proxy = proxy.clone();
            thread::spawn(move || proxy.invoke(|_| Ok::<_, ServiceNotAvailable>(1)))
        };
        while election.quorum_checks() < 10 {
            thread::yield_now();
        }
        proxy.close();
        let result = caller.join().expect("caller");
        assert!(matches!(result, Err(ProxyError::Closed)));
    }
}
