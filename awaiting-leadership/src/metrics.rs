// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Counters describing what a proxy has done so far

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the acquisition worker and by callers
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    acquisitions: AtomicU64,
    acquisition_submissions: AtomicU64,
    interrupted_acquisitions: AtomicU64,
    construction_failures: AtomicU64,
    leadership_losses: AtomicU64,
    delegate_releases: AtomicU64,
    release_failures: AtomicU64,
    not_leader_rejections: AtomicU64,
    dispatched_calls: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $field:ident) => {
        pub(crate) fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::SeqCst);
        }
    };
}

impl ProxyMetrics {
    counter!(record_acquisition, acquisitions);
    counter!(record_submission, acquisition_submissions);
    counter!(record_interrupted_acquisition, interrupted_acquisitions);
    counter!(record_construction_failure, construction_failures);
    counter!(record_leadership_loss, leadership_losses);
    counter!(record_release, delegate_releases);
    counter!(record_release_failure, release_failures);
    counter!(record_not_leader_rejection, not_leader_rejections);
    counter!(record_dispatch, dispatched_calls);

    /// Copy the current values
    pub fn snapshot(&self) -> MetricsReport {
        MetricsReport {
            acquisitions: self.acquisitions.load(Ordering::SeqCst),
            acquisition_submissions: self.acquisition_submissions.load(Ordering::SeqCst),
            interrupted_acquisitions: self.interrupted_acquisitions.load(Ordering::SeqCst),
            construction_failures: self.construction_failures.load(Ordering::SeqCst),
            leadership_losses: self.leadership_losses.load(Ordering::SeqCst),
            delegate_releases: self.delegate_releases.load(Ordering::SeqCst),
            release_failures: self.release_failures.load(Ordering::SeqCst),
            not_leader_rejections: self.not_leader_rejections.load(Ordering::SeqCst),
            dispatched_calls: self.dispatched_calls.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`ProxyMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsReport {
    /// Terms published (token and delegate both visible)
    pub acquisitions: u64,
    /// Acquisition attempts handed to the worker
    pub acquisition_submissions: u64,
    /// Attempts that ended on an interruption from the election service
    pub interrupted_acquisitions: u64,
    /// Delegate factory failures
    pub construction_failures: u64,
    /// Loss transitions performed (one per lost term)
    pub leadership_losses: u64,
    /// Delegates taken out of service
    pub delegate_releases: u64,
    /// Delegate `close` failures (the delegate is released anyway)
    pub release_failures: u64,
    /// Calls refused with a not-current-leader error
    pub not_leader_rejections: u64,
    /// Calls handed to a delegate
    pub dispatched_calls: u64,
}
