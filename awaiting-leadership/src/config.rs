// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Proxy configuration

use std::thread;
use std::time::Duration;

/// Default name of the acquisition worker thread
pub const DEFAULT_WORKER_NAME: &str = "awaiting-leadership";

/// What a caller does between two leadership checks answered `NoQuorum`
///
/// The check is retried until it yields an authoritative answer, whatever
/// the policy. Only the pause between attempts changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuorumRetry {
    /// Retry immediately
    #[default]
    Spin,
    /// Yield the thread before retrying
    Yield,
    /// Sleep before retrying
    Sleep(Duration),
}

impl QuorumRetry {
    pub(crate) fn pause(self) {
        match self {
            QuorumRetry::Spin => std::hint::spin_loop(),
            QuorumRetry::Yield => thread::yield_now(),
            QuorumRetry::Sleep(duration) => thread::sleep(duration),
        }
    }
}

/// Configuration of an [`AwaitingLeadershipProxy`](crate::AwaitingLeadershipProxy)
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Name given to the acquisition worker thread
    pub worker_name: String,

    /// Pause between `NoQuorum` answers on the calling thread
    pub quorum_retry: QuorumRetry,

    /// Pause between two failed delegate constructions
    ///
    /// `None` retries in a tight loop.
    pub delegate_retry_backoff: Option<Duration>,
}

impl Default for ProxyConfig {
    /// Spin on `NoQuorum`, retry construction without pause
    fn default() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            quorum_retry: QuorumRetry::Spin,
            delegate_retry_backoff: None,
        }
    }
}

impl ProxyConfig {
    pub fn with_worker_name(self, worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            ..self
        }
    }

    pub fn with_quorum_retry(self, quorum_retry: QuorumRetry) -> Self {
        Self {
            quorum_retry,
            ..self
        }
    }

    pub fn with_delegate_retry_backoff(self, backoff: Duration) -> Self {
        Self {
            delegate_retry_backoff: Some(backoff),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_tight_retries() {
        let config = ProxyConfig::default();
        assert_eq!(config.worker_name, DEFAULT_WORKER_NAME);
        assert_eq!(config.quorum_retry, QuorumRetry::Spin);
        assert_eq!(config.delegate_retry_backoff, None);
    }

    #[test]
    fn builders_override_fields() {
        let config = ProxyConfig::default()
            .with_worker_name("timestamp-leader")
            .with_quorum_retry(QuorumRetry::Sleep(Duration::from_millis(5)))
            .with_delegate_retry_backoff(Duration::from_millis(50));
        assert_eq!(config.worker_name, "timestamp-leader");
        assert_eq!(config.quorum_retry, QuorumRetry::Sleep(Duration::from_millis(5)));
        assert_eq!(config.delegate_retry_backoff, Some(Duration::from_millis(50)));
    }
}
