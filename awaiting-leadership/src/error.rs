// Copyright 2024 awaiting-leadership developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types surfaced to callers of a wrapped service
//!
//! Leadership conditions ([`ProxyError::NotCurrentLeader`]) are kept apart
//! from ordinary delegate failures ([`ProxyError::Delegate`]) so callers can
//! retry against whichever process leads now without masking application
//! errors.

use std::error::Error;
use std::fmt;

/// Boxed error used at the delegate factory and close seams
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Recognizes errors that mean "this process is no longer the leader"
///
/// A delegate (or a layer below it) may detect loss of leadership on its
/// own, for example because a downstream service rejects a fenced request.
/// When a delegate error answers `true`, the proxy performs the
/// leadership-loss transition and reports
/// [`ProxyError::NotCurrentLeader`] with that error as cause.
pub trait LeadershipSignal {
    fn signals_leadership_loss(&self) -> bool;
}

/// Why a call was refused as coming from a non-leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotLeadingReason {
    /// No leadership term is held: none was granted yet, or the last one
    /// was already lost and cleared
    NoTerm,
    /// The election service reported that the term is over
    LeadershipLost,
    /// The delegate reported a leadership-loss error
    LossSignalled,
}

impl NotLeadingReason {
    fn message(self) -> &'static str {
        match self {
            Self::NoTerm => "method invoked on a non-leader",
            Self::LeadershipLost | Self::LossSignalled => {
                "method invoked on a non-leader (leadership lost)"
            }
        }
    }
}

/// Error returned by [`AwaitingLeadershipProxy::invoke`](crate::AwaitingLeadershipProxy::invoke)
#[derive(Debug)]
pub enum ProxyError<E> {
    /// This process does not hold leadership
    ///
    /// Recoverable: retry against the current leader.
    NotCurrentLeader {
        reason: NotLeadingReason,
        /// The delegate error that signalled the loss, if any
        cause: Option<E>,
    },
    /// The proxy was closed; calling it again is a programming error
    Closed,
    /// The delegate failed with an ordinary application error
    Delegate(E),
}

impl<E> ProxyError<E> {
    pub(crate) fn not_leading(reason: NotLeadingReason) -> Self {
        Self::NotCurrentLeader {
            reason,
            cause: None,
        }
    }

    pub fn is_not_current_leader(&self) -> bool {
        matches!(self, Self::NotCurrentLeader { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Reason for a not-current-leader error
    pub fn reason(&self) -> Option<NotLeadingReason> {
        match self {
            Self::NotCurrentLeader { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The delegate error that signalled leadership loss, if any
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::NotCurrentLeader { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// Returns the delegate error for [`ProxyError::Delegate`], and gives
    /// `self` back otherwise
    pub fn into_delegate_error(self) -> Result<E, Self> {
        match self {
            Self::Delegate(e) => Ok(e),
            other => Err(other),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ProxyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCurrentLeader {
                reason,
                cause: Some(cause),
            } => write!(f, "{}: {cause}", reason.message()),
            Self::NotCurrentLeader { reason, cause: None } => write!(f, "{}", reason.message()),
            Self::Closed => write!(f, "proxy already closed"),
            Self::Delegate(e) => write!(f, "{e}"),
        }
    }
}

impl<E: Error + 'static> Error for ProxyError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotCurrentLeader { cause, .. } => cause.as_ref().map(|e| e as &(dyn Error + 'static)),
            Self::Closed => None,
            Self::Delegate(e) => Some(e),
        }
    }
}

impl<E> LeadershipSignal for ProxyError<E> {
    fn signals_leadership_loss(&self) -> bool {
        self.is_not_current_leader()
    }
}

/// A remote service could not be reached
///
/// Treated as a leadership-loss signal: a leader that cannot reach the
/// service it fences is assumed to have been superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNotAvailable {
    message: String,
}

impl ServiceNotAvailable {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceNotAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service not available: {}", self.message)
    }
}

impl Error for ServiceNotAvailable {}

impl LeadershipSignal for ServiceNotAvailable {
    fn signals_leadership_loss(&self) -> bool {
        true
    }
}

/// A downstream layer reported that this process is not the leader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotCurrentLeaderError {
    message: String,
}

impl NotCurrentLeaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for NotCurrentLeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Not current leader: {}", self.message)
    }
}

impl Error for NotCurrentLeaderError {}

impl LeadershipSignal for NotCurrentLeaderError {
    fn signals_leadership_loss(&self) -> bool {
        true
    }
}

impl LeadershipSignal for BoxError {
    fn signals_leadership_loss(&self) -> bool {
        self.is::<ServiceNotAvailable>() || self.is::<NotCurrentLeaderError>()
    }
}
