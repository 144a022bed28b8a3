//! Cancellation and deadline propagation.
//!
//! A [`CallContext`] travels with every call the client makes. It carries a
//! cancellation token shared with whoever owns the operation and an optional
//! absolute deadline. Deadlines only ever tighten: deriving a context with a
//! later deadline than the current one keeps the current one.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<DateTime<Utc>>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context: cancelled with the parent, cancellable on its own
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Same cancellation, deadline no later than `now + timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        match at {
            Some(at) => self.with_deadline(at),
            // Out of range for a timestamp, effectively no deadline
            None => self.clone(),
        }
    }

    /// Same cancellation, deadline is the earlier of the current one and `at`
    pub fn with_deadline(&self, at: DateTime<Utc>) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= at => current,
            _ => at,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    /// Keeps the deadline but is no longer cancelled by the parent
    pub fn detached(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// `None` while the context is live
    pub fn err(&self) -> Option<ClientError> {
        if self.token.is_cancelled() {
            return Some(ClientError::Canceled);
        }
        match self.deadline {
            Some(at) if at <= Utc::now() => Some(ClientError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> ClientError {
        match self.remaining() {
            Some(remaining) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ClientError::Canceled,
                    _ = tokio::time::sleep(remaining) => ClientError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ClientError::Canceled
            }
        }
    }

    /// Run `fut` unless the context finishes first
    pub async fn run<F>(&self, fut: F) -> crate::Result<F::Output>
    where
        F: std::future::Future,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
