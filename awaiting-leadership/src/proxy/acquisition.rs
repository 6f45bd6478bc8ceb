// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Leadership acquisition worker
//!
//! One named thread per proxy drains a queue of acquisition jobs, one job
//! per lost term. Each job:
//!
//! 1. waits on the election service until this process leads
//! 2. builds a delegate, retrying until the factory succeeds or the proxy
//!    closes (a factory panic counts as a failed attempt)
//! 3. publishes the delegate, then the token
//!
//! Jobs run strictly one after the other, so two attempts never race on
//! delegate construction. Closing the proxy aborts the loop; the wait in
//! step 1 is dropped on the spot.

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::channel::mpsc::UnboundedReceiver;
use futures::executor::block_on;
use futures::future::{AbortRegistration, Abortable, Aborted};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::Shared;
use crate::delegate::Delegate;
use crate::election::LeaderElectionError;

pub(super) fn spawn<T: Delegate>(
    shared: Arc<Shared<T>>,
    mut queue: UnboundedReceiver<()>,
    registration: AbortRegistration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(shared.config.worker_name.clone())
        .spawn(move || {
            debug!("acquisition worker started");
            let in_flight = Cell::new(false);
            let attempts = async {
                while queue.next().await.is_some() {
                    if shared.is_closed() {
                        break;
                    }
                    in_flight.set(true);
                    gain_leadership(&shared).await;
                    in_flight.set(false);
                }
            };

            match block_on(Abortable::new(attempts, registration)) {
                Ok(()) => debug!("acquisition worker drained"),
                Err(Aborted) => {
                    if in_flight.get() {
                        shared.metrics.record_interrupted_acquisition();
                        warn!("attempt to gain leadership interrupted");
                    }
                    debug!("acquisition worker stopped");
                }
            }
        })
}

async fn gain_leadership<T: Delegate>(shared: &Shared<T>) {
    let token = match shared.election.block_on_becoming_leader().await {
        Ok(token) => token,
        Err(LeaderElectionError::Interrupted) => {
            shared.metrics.record_interrupted_acquisition();
            warn!("attempt to gain leadership interrupted");
            return;
        }
        Err(e) => {
            error!(error = %e, "problem blocking on leadership");
            return;
        }
    };

    // We are now the leader, build a delegate to serve calls with
    let Some(delegate) = build_delegate(shared) else {
        debug!(ballot = token.ballot(), "proxy closed while building delegate");
        return;
    };

    // The delegate must be visible before the token.
    shared.delegate.publish(Arc::new(delegate));
    if shared.is_closed() {
        shared.delegate.clear(&shared.metrics);
        return;
    }

    shared.token.store(Some(Arc::new(token)));
    if shared.is_closed() {
        // close() ran between the check above and the publish
        shared.token.store(None);
        shared.delegate.clear(&shared.metrics);
        return;
    }
    shared.metrics.record_acquisition();
    info!(ballot = token.ballot(), "gained leadership");
}

fn build_delegate<T: Delegate>(shared: &Shared<T>) -> Option<T> {
    loop {
        // A panicking factory is one more failed attempt, not the end of the worker
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| shared.factory.create())) {
            Ok(Ok(delegate)) => return Some(delegate),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        shared.metrics.record_construction_failure();
        error!(error = %failure, "problem creating delegate");
        if shared.is_closed() {
            return None;
        }
        if let Some(backoff) = shared.config.delegate_retry_backoff {
            thread::sleep(backoff);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("factory panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("factory panicked: {message}")
    } else {
        "factory panicked".to_string()
    }
}
