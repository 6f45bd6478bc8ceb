// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
#![doc = include_str!("../README.md")]

pub mod config;
pub mod delegate;
pub mod election;
pub mod error;
pub mod expiring;
pub mod metrics;
mod proxy;
pub mod token;

pub use crate::config::{ProxyConfig, QuorumRetry};
pub use crate::delegate::{Delegate, DelegateFactory};
pub use crate::election::{InMemoryLeaderElection, LeaderElectionError, LeaderElectionService};
pub use crate::error::{
    BoxError, LeadershipSignal, NotCurrentLeaderError, NotLeadingReason, ProxyError,
    ServiceNotAvailable,
};
pub use crate::expiring::{ExpiringToken, LockClient, LockToken};
pub use crate::metrics::MetricsReport;
pub use crate::proxy::{AwaitingLeadershipProxy, ProxyState};
pub use crate::token::{LeadershipToken, StillLeadingStatus};
