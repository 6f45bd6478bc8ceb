// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Timed lock grants
//!
//! An [`ExpiringToken`] is a lock record with a creation and an expiration
//! timestamp, both in milliseconds since the epoch. It is not a leadership
//! token: the proxy never looks at it. Lease-refresh schedulers use
//! [`compare_by_expiration`] or [`soonest_expiring`] to find the next token
//! that needs attention.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// The holder of a set of locks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockClient {
    id: String,
}

impl LockClient {
    /// Create a client with the given identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The client used by callers that do not identify themselves
    pub fn anonymous() -> Self {
        Self { id: String::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_empty()
    }
}

impl fmt::Display for LockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "<anonymous>")
        } else {
            write!(f, "{}", self.id)
        }
    }
}

/// A lock server token with an expiration date
pub trait ExpiringToken {
    /// Time (ms since the epoch) this token was created
    fn creation_date_ms(&self) -> u64;

    /// Time (ms since the epoch) this token stops being valid
    fn expiration_date_ms(&self) -> u64;

    /// Client holding the locks, or `None` if this is a lock grant
    fn client(&self) -> Option<&LockClient>;

    /// How long it takes for these locks to expire
    fn lock_timeout(&self) -> Duration;

    /// Version id, if one was assigned
    fn version_id(&self) -> Option<u64>;

    /// `true` if this token represents a grant rather than directly held locks
    fn is_grant(&self) -> bool {
        self.client().is_none()
    }

    /// Check whether the token has expired at `now_ms`
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expiration_date_ms()
    }

    /// Get remaining validity, if any
    ///
    /// # Returns
    /// `Some(Duration)` if the token is still valid at `now_ms`, `None` if expired
    fn remaining(&self, now_ms: u64) -> Option<Duration> {
        let expiration = self.expiration_date_ms();
        if now_ms < expiration {
            Some(Duration::from_millis(expiration - now_ms))
        } else {
            None
        }
    }
}

/// Order two tokens by expiration date only
///
/// Creation time, client and version are ignored.
pub fn compare_by_expiration<A, B>(a: &A, b: &B) -> Ordering
where
    A: ExpiringToken + ?Sized,
    B: ExpiringToken + ?Sized,
{
    a.expiration_date_ms().cmp(&b.expiration_date_ms())
}

/// Token that expires first, if any
pub fn soonest_expiring<'a, T, I>(tokens: I) -> Option<&'a T>
where
    T: ExpiringToken + 'a,
    I: IntoIterator<Item = &'a T>,
{
    tokens.into_iter().min_by(|a, b| compare_by_expiration(*a, *b))
}

/// Wrapper ordering a token by its expiration date
///
/// Two wrapped tokens with the same expiration compare equal even if they
/// differ in every other field. Wrap in [`std::cmp::Reverse`] to pop the
/// soonest-expiring token first from a `BinaryHeap`.
#[derive(Debug, Clone)]
pub struct ByExpiration<T>(pub T);

impl<T> ByExpiration<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: ExpiringToken> PartialEq for ByExpiration<T> {
    fn eq(&self, other: &Self) -> bool {
        compare_by_expiration(&self.0, &other.0) == Ordering::Equal
    }
}

impl<T: ExpiringToken> Eq for ByExpiration<T> {}

impl<T: ExpiringToken> PartialOrd for ByExpiration<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ExpiringToken> Ord for ByExpiration<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_by_expiration(&self.0, &other.0)
    }
}

/// Immutable lock token
///
/// Built either for a client holding locks directly ([`LockToken::held_by`])
/// or as a grant not owned by any client ([`LockToken::grant`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockToken {
    creation_date_ms: u64,
    expiration_date_ms: u64,
    client: Option<LockClient>,
    lock_timeout: Duration,
    version_id: Option<u64>,
}

impl LockToken {
    /// Locks held directly by `client`, expiring `lock_timeout` after creation
    pub fn held_by(client: LockClient, creation_date_ms: u64, lock_timeout: Duration) -> Self {
        Self::build(Some(client), creation_date_ms, lock_timeout)
    }

    /// A lock grant, not owned by any client
    pub fn grant(creation_date_ms: u64, lock_timeout: Duration) -> Self {
        Self::build(None, creation_date_ms, lock_timeout)
    }

    fn build(client: Option<LockClient>, creation_date_ms: u64, lock_timeout: Duration) -> Self {
        let timeout_ms = u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX);
        Self {
            creation_date_ms,
            expiration_date_ms: creation_date_ms.saturating_add(timeout_ms),
            client,
            lock_timeout,
            version_id: None,
        }
    }

    /// Attach a version id
    pub fn with_version_id(self, version_id: u64) -> Self {
        Self {
            version_id: Some(version_id),
            ..self
        }
    }
}

impl ExpiringToken for LockToken {
    fn creation_date_ms(&self) -> u64 {
        self.creation_date_ms
    }

    fn expiration_date_ms(&self) -> u64 {
        self.expiration_date_ms
    }

    fn client(&self) -> Option<&LockClient> {
        self.client.as_ref()
    }

    fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn version_id(&self) -> Option<u64> {
        self.version_id
    }
}
