// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Process-local election service
//!
//! Leadership is switched on and off by hand with [`InMemoryLeaderElection::grant`]
//! and [`InMemoryLeaderElection::revoke`]. Every successful
//! `block_on_becoming_leader` starts a new term with the next ballot, and only
//! the token of that term answers `Leading`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::channel::oneshot;
use tracing::debug;

use super::{LeaderElectionError, LeaderElectionService, Result};
use crate::token::{LeadershipToken, StillLeadingStatus};

#[derive(Debug)]
struct State {
    ballot: u64,
    leading: Option<LeadershipToken>,
    available: bool,
    quorum_available: bool,
    failing_checks: u64,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// Election service living entirely in this process
#[derive(Debug)]
pub struct InMemoryLeaderElection {
    state: Mutex<State>,
    acquisition_requests: AtomicU64,
    quorum_checks: AtomicU64,
}

impl Default for InMemoryLeaderElection {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLeaderElection {
    /// Service that does not grant leadership until [`grant`](Self::grant) is called
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ballot: 0,
                leading: None,
                available: false,
                quorum_available: true,
                failing_checks: 0,
                waiters: Vec::new(),
            }),
            acquisition_requests: AtomicU64::new(0),
            quorum_checks: AtomicU64::new(0),
        }
    }

    /// Service that grants leadership to the first request
    pub fn granted() -> Self {
        let election = Self::new();
        election.grant();
        election
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make leadership available to this process
    ///
    /// Pending and future waits resolve with a new term. Does nothing if
    /// leadership is already available.
    pub fn grant(&self) {
        let mut state = self.lock();
        if state.available {
            return;
        }
        state.available = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// End the current term
    ///
    /// The current token answers `NotLeading` from now on, and no new term is
    /// granted until [`grant`](Self::grant) is called again.
    pub fn revoke(&self) {
        let mut state = self.lock();
        state.available = false;
        if let Some(token) = state.leading.take() {
            debug!(ballot = token.ballot(), "revoked leadership");
        }
    }

    /// Switch quorum availability; while unavailable every check answers `NoQuorum`
    pub fn set_quorum_available(&self, available: bool) {
        self.lock().quorum_available = available;
    }

    /// Answer `NoQuorum` to the next `count` checks, whatever the term
    pub fn fail_quorum_checks(&self, count: u64) {
        self.lock().failing_checks += count;
    }

    /// Resolve every pending wait with [`LeaderElectionError::Interrupted`]
    pub fn interrupt_waiters(&self) {
        let mut state = self.lock();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Err(LeaderElectionError::Interrupted));
        }
    }

    /// Ballot of the current term, if any
    pub fn current_ballot(&self) -> Option<u64> {
        self.lock().leading.map(|token| token.ballot())
    }

    /// `true` while leadership is available to this process
    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    /// Number of waits currently parked
    pub fn pending_waiters(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_canceled())
            .count()
    }

    /// Number of `block_on_becoming_leader` calls so far
    pub fn acquisition_requests(&self) -> u64 {
        self.acquisition_requests.load(Ordering::SeqCst)
    }

    /// Number of `is_still_leading` calls so far
    pub fn quorum_checks(&self) -> u64 {
        self.quorum_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaderElectionService for InMemoryLeaderElection {
    async fn block_on_becoming_leader(&self) -> Result<LeadershipToken> {
        self.acquisition_requests.fetch_add(1, Ordering::SeqCst);
        loop {
            let waiter = {
                let mut state = self.lock();
                if state.available {
                    state.ballot += 1;
                    let token = LeadershipToken::new(state.ballot);
                    state.leading = Some(token);
                    debug!(ballot = token.ballot(), "granted leadership");
                    return Ok(token);
                }
                // waits dropped since the last grant
                state.waiters.retain(|waiter| !waiter.is_canceled());
                let (sender, receiver) = oneshot::channel();
                state.waiters.push(sender);
                receiver
            };

            match waiter.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => return Err(e),
                Err(oneshot::Canceled) => {
                    return Err(LeaderElectionError::InvalidState(
                        "waiter dropped without an answer".to_string(),
                    ))
                }
            }
        }
    }

    fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus {
        self.quorum_checks.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.failing_checks > 0 {
            state.failing_checks -= 1;
            return StillLeadingStatus::NoQuorum;
        }
        if !state.quorum_available {
            return StillLeadingStatus::NoQuorum;
        }
        match state.leading {
            Some(current) if current == *token => StillLeadingStatus::Leading,
            _ => StillLeadingStatus::NotLeading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn grants_increasing_ballots() {
        let election = InMemoryLeaderElection::granted();
        let first = block_on(election.block_on_becoming_leader()).expect("leadership");
        let second = block_on(election.block_on_becoming_leader()).expect("leadership");
        assert_eq!(first.ballot(), 1);
        assert_eq!(second.ballot(), 2);
        assert_eq!(election.is_still_leading(&first), StillLeadingStatus::NotLeading);
        assert_eq!(election.is_still_leading(&second), StillLeadingStatus::Leading);
        assert_eq!(election.acquisition_requests(), 2);
    }

    #[test]
    fn revoke_ends_the_term() {
        let election = InMemoryLeaderElection::granted();
        let token = block_on(election.block_on_becoming_leader()).expect("leadership");
        election.revoke();
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::NotLeading);
        assert_eq!(election.current_ballot(), None);
        assert!(!election.is_available());
    }

    #[test]
    fn quorum_failures_hide_the_answer() {
        let election = InMemoryLeaderElection::granted();
        let token = block_on(election.block_on_becoming_leader()).expect("leadership");
        election.fail_quorum_checks(2);
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::NoQuorum);
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::NoQuorum);
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::Leading);

        election.set_quorum_available(false);
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::NoQuorum);
        election.set_quorum_available(true);
        assert_eq!(election.is_still_leading(&token), StillLeadingStatus::Leading);
        assert_eq!(election.quorum_checks(), 5);
    }

    #[test]
    fn waiter_wakes_on_grant() {
        let election = Arc::new(InMemoryLeaderElection::new());
        let waiting = {
            let election = election.clone();
            thread::spawn(move || block_on(election.block_on_becoming_leader()))
        };
        while election.pending_waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        election.grant();
        let token = waiting.join().expect("thread").expect("leadership");
        assert_eq!(election.current_ballot(), Some(token.ballot()));
    }

    #[test]
    fn waiter_can_be_interrupted() {
        let election = Arc::new(InMemoryLeaderElection::new());
        let waiting = {
            let election = election.clone();
            thread::spawn(move || block_on(election.block_on_becoming_leader()))
        };
        while election.pending_waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        election.interrupt_waiters();
        let result = waiting.join().expect("thread");
        assert_eq!(result, Err(LeaderElectionError::Interrupted));
    }

    #[test]
    fn dropped_waits_are_pruned() {
        let election = InMemoryLeaderElection::new();
        for _ in 0..3 {
            assert!(election.block_on_becoming_leader().now_or_never().is_none());
        }
        assert_eq!(election.pending_waiters(), 0);
        assert_eq!(election.lock().waiters.len(), 3);

        // the next wait to park sweeps the dropped ones
        assert!(election.block_on_becoming_leader().now_or_never().is_none());
        assert_eq!(election.lock().waiters.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_runs_under_tokio() {
        let election = Arc::new(InMemoryLeaderElection::new());
        let task = {
            let election = election.clone();
            tokio::spawn(async move { election.block_on_becoming_leader().await })
        };
        while election.pending_waiters() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        election.grant();
        let token = task.await.expect("task").expect("leadership");
        assert_eq!(token.ballot(), 1);
    }
}
