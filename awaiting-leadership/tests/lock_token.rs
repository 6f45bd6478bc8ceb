// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cmp::Ordering;
use std::time::Duration;

use awaiting_leadership::expiring::{compare_by_expiration, soonest_expiring};
use awaiting_leadership::{ExpiringToken, LockClient, LockToken};

/// Token kept by an external lock server, next to the built-in one
struct LeaseRecord {
    expires_at_ms: u64,
}

impl ExpiringToken for LeaseRecord {
    fn creation_date_ms(&self) -> u64 {
        0
    }

    fn expiration_date_ms(&self) -> u64 {
        self.expires_at_ms
    }

    fn client(&self) -> Option<&LockClient> {
        None
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.expires_at_ms)
    }

    fn version_id(&self) -> Option<u64> {
        None
    }
}

#[test]
fn test_tokens_of_different_kinds_compare_by_expiration() {
    let held = LockToken::held_by(LockClient::new("scheduler-1"), 100, Duration::from_millis(400));
    let record = LeaseRecord { expires_at_ms: 500 };
    let later = LeaseRecord { expires_at_ms: 501 };

    assert_eq!(compare_by_expiration(&held, &record), Ordering::Equal);
    assert_eq!(compare_by_expiration(&held, &later), Ordering::Less);
    assert_eq!(compare_by_expiration(&later, &held), Ordering::Greater);

    let dyn_tokens: Vec<&dyn ExpiringToken> = vec![&later, &held];
    assert_eq!(compare_by_expiration(dyn_tokens[0], dyn_tokens[1]), Ordering::Greater);
}

#[test]
fn test_soonest_expiring_lock() {
    let tokens = vec![
        LockToken::grant(0, Duration::from_secs(30)),
        LockToken::held_by(LockClient::new("a"), 10_000, Duration::from_secs(5)),
        LockToken::held_by(LockClient::anonymous(), 0, Duration::from_secs(20)),
    ];

    let soonest = soonest_expiring(&tokens).expect("tokens not empty");
    assert_eq!(soonest.expiration_date_ms(), 15_000);
    assert_eq!(soonest.client().map(LockClient::id), Some("a"));
    assert!(soonest_expiring(&Vec::<LockToken>::new()).is_none());
}

#[test]
fn test_lock_expiry_at_boundary() {
    let token = LockToken::grant(1_000, Duration::from_millis(250)).with_version_id(7);
    assert_eq!(token.remaining(1_000), Some(Duration::from_millis(250)));
    assert!(!token.is_expired(1_249));
    assert!(token.is_expired(1_250));
    assert_eq!(token.remaining(1_250), None);
    assert_eq!(token.version_id(), Some(7));
}

#[cfg(feature = "serde")]
#[test]
fn test_lock_token_serde() {
    let token = LockToken::held_by(LockClient::new("a"), 42, Duration::from_secs(1))
        .with_version_id(3);
    let json = serde_json::to_string(&token).expect("serialize");
    let back: LockToken = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, token);
    assert_eq!(back.expiration_date_ms(), 1_042);
}
