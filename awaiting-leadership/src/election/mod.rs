// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Contract of the leader election service
//!
//! How peers agree on a leader is out of scope here. The proxy only needs two
//! things from the election service:
//!
//! 1. **Block until leader**: suspend the acquisition worker until this
//!    process leads, then hand out a fresh [`LeadershipToken`]
//! 2. **Still leading?**: a non-blocking check of one token, answering
//!    [`StillLeadingStatus::Leading`], [`StillLeadingStatus::NotLeading`] or
//!    [`StillLeadingStatus::NoQuorum`]
//!
//! `NoQuorum` means the answer could not be computed and says nothing about
//! leadership; callers retry it.

mod memory;

pub use memory::InMemoryLeaderElection;

use crate::token::{LeadershipToken, StillLeadingStatus};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Election service errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderElectionError {
    /// The wait for leadership was interrupted
    ///
    /// A soft abort of the current acquisition attempt, not a fatal error.
    Interrupted,
    /// The election backend could not be reached
    Unavailable(String),
    /// The election backend is in an unexpected state
    InvalidState(String),
}

impl fmt::Display for LeaderElectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "Wait for leadership interrupted"),
            Self::Unavailable(msg) => write!(f, "Election service unavailable: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for LeaderElectionError {}

/// Result type for election operations
pub type Result<T> = std::result::Result<T, LeaderElectionError>;

/// Source of leadership for this process
#[async_trait]
pub trait LeaderElectionService: Send + Sync {
    /// Wait until this process is leader and return the token of the new term
    ///
    /// Called once per lost-leadership cycle. Dropping the returned future
    /// abandons the wait.
    async fn block_on_becoming_leader(&self) -> Result<LeadershipToken>;

    /// Check whether `token` is still the current term
    ///
    /// Must not block.
    fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus;
}

#[async_trait]
impl<S: LeaderElectionService + ?Sized> LeaderElectionService for Arc<S> {
    async fn block_on_becoming_leader(&self) -> Result<LeadershipToken> {
        (**self).block_on_becoming_leader().await
    }

    fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus {
        (**self).is_still_leading(token)
    }
}

#[async_trait]
impl<S: LeaderElectionService + ?Sized> LeaderElectionService for Box<S> {
    async fn block_on_becoming_leader(&self) -> Result<LeadershipToken> {
        (**self).block_on_becoming_leader().await
    }

    fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus {
        (**self).is_still_leading(token)
    }
}
