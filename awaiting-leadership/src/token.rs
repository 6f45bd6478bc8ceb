// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Leadership terms
//!
//! A [`LeadershipToken`] is handed out by a
//! [`LeaderElectionService`](crate::LeaderElectionService) every time this
//! process becomes leader. The ballot works like Raft's term: it increases
//! with every grant issued by one service. The nonce gives every grant its own
//! identity, so a token from an earlier term never compares equal to a later
//! one even if a service hands out the same ballot twice.

use std::fmt;

/// One leadership term of this process
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeadershipToken {
    ballot: u64,
    nonce: u128,
}

impl LeadershipToken {
    /// Mint a token for the given ballot with a fresh random identity
    pub fn new(ballot: u64) -> Self {
        Self {
            ballot,
            nonce: rand::random(),
        }
    }

    /// Rebuild a token whose identity was minted elsewhere
    ///
    /// Election services that persist or transmit tokens use this to hand back
    /// the exact identity they recorded.
    pub fn from_parts(ballot: u64, nonce: u128) -> Self {
        Self { ballot, nonce }
    }

    /// Ballot (term number) of this grant
    pub fn ballot(&self) -> u64 {
        self.ballot
    }

    /// Identity of this grant
    pub fn nonce(&self) -> u128 {
        self.nonce
    }
}

impl fmt::Debug for LeadershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeadershipToken(ballot={}, id={:08x})", self.ballot, self.nonce as u32)
    }
}

/// Answer to "is this token still the current leadership term?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StillLeadingStatus {
    /// The token is still the current term
    Leading,
    /// Leadership was lost; the token must not serve another call
    NotLeading,
    /// The check could not be completed (not enough peers reachable)
    ///
    /// Carries no information about leadership. Callers retry the check
    /// instead of treating it as a loss.
    NoQuorum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_with_same_ballot_are_distinct_grants() {
        let first = LeadershipToken::new(7);
        let second = LeadershipToken::new(7);
        assert_eq!(first.ballot(), second.ballot());
        assert_ne!(first, second);
        assert_eq!(first, first);
    }

    #[test]
    fn rebuilt_token_keeps_identity() {
        let token = LeadershipToken::new(3);
        let rebuilt = LeadershipToken::from_parts(token.ballot(), token.nonce());
        assert_eq!(token, rebuilt);
    }
}
