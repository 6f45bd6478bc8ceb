// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Delegate lifecycle
//!
//! A delegate is the concrete service a leader uses to do real work. It is
//! built by a [`DelegateFactory`] right after leadership is gained and
//! released as soon as the term ends. At most one delegate is live at a time.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::warn;

use crate::error::BoxError;
use crate::metrics::ProxyMetrics;

/// Service implementation owned by one leadership term
///
/// Delegates holding resources override [`close`](Delegate::close); it runs
/// once, when the term that built the delegate ends or the proxy is closed.
/// A failing close is logged and does not stop the next acquisition.
pub trait Delegate: Send + Sync + 'static {
    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<D: Delegate + ?Sized> Delegate for Box<D> {
    fn close(&self) -> Result<(), BoxError> {
        (**self).close()
    }
}

/// Builds a new delegate; may be called many times and may fail
pub trait DelegateFactory<T>: Send + Sync {
    fn create(&self) -> Result<T, BoxError>;
}

impl<T, F> DelegateFactory<T> for F
where
    F: Fn() -> Result<T, BoxError> + Send + Sync,
{
    fn create(&self) -> Result<T, BoxError> {
        self()
    }
}

/// Atomically swappable cell holding the live delegate
///
/// Readers never block; the cell is always replaced wholesale.
pub(crate) struct DelegateSlot<T> {
    current: ArcSwapOption<T>,
}

impl<T: Delegate> DelegateSlot<T> {
    pub(crate) fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn publish(&self, delegate: Arc<T>) {
        self.current.store(Some(delegate));
    }

    pub(crate) fn load(&self) -> Option<Arc<T>> {
        self.current.load_full()
    }

    pub(crate) fn is_present(&self) -> bool {
        self.current.load().is_some()
    }

    /// Take the delegate out of service and close it
    ///
    /// Idempotent: an empty slot is left alone.
    pub(crate) fn clear(&self, metrics: &ProxyMetrics) {
        let Some(delegate) = self.current.swap(None) else {
            return;
        };
        metrics.record_release();
        if let Err(e) = delegate.close() {
            metrics.record_release_failure();
            warn!(error = %e, "problem closing delegate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Closing {
        closes: AtomicUsize,
        fail: bool,
    }

    impl Delegate for Closing {
        fn close(&self) -> Result<(), BoxError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Box::new(io::Error::new(io::ErrorKind::Other, "close failed")))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn clear_closes_once() {
        let metrics = ProxyMetrics::default();
        let slot = DelegateSlot::empty();
        let delegate = Arc::new(Closing::default());
        slot.publish(delegate.clone());
        assert!(slot.is_present());

        slot.clear(&metrics);
        slot.clear(&metrics);
        assert!(!slot.is_present());
        assert_eq!(delegate.closes.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().delegate_releases, 1);
    }

    #[test]
    fn failed_close_still_releases() {
        let metrics = ProxyMetrics::default();
        let slot = DelegateSlot::empty();
        slot.publish(Arc::new(Closing {
            fail: true,
            ..Closing::default()
        }));
        slot.clear(&metrics);
        assert!(slot.load().is_none());
        let report = metrics.snapshot();
        assert_eq!(report.delegate_releases, 1);
        assert_eq!(report.release_failures, 1);
    }

    #[test]
    fn closures_are_factories() {
        struct Plain;
        impl Delegate for Plain {}

        let factory = || -> Result<Plain, BoxError> { Ok(Plain) };
        assert!(factory.create().is_ok());
        assert!(Plain.close().is_ok());
    }
}
