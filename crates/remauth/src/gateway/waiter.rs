//! One-shot, multi-reader signals that callers suspend on.
//!
//! A [`Waiter`] is set at most once. Any number of [`WaitHandle`]s may await
//! it; all of them observe the same value. Dropping the waiter while still
//! pending resolves every handle with [`AuthError::SessionClosed`].

use remauth_proto::RemoteUser;
use tokio::sync::watch;

use crate::error::AuthError;

use super::protocol::{Completion, QrLogin};

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending,
    Done(Result<T, AuthError>),
}

impl<T> Slot<T> {
    const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Single-writer side of a signal.
#[derive(Debug)]
pub struct Waiter<T> {
    tx: watch::Sender<Slot<T>>,
}

impl<T: Clone> Waiter<T> {
    /// Create a pending waiter.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::Pending);
        Self { tx }
    }

    /// Resolve with a value. Returns `false` if already resolved.
    pub fn set(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn fail(&self, err: AuthError) -> bool {
        self.resolve(Err(err))
    }

    fn resolve(&self, result: Result<T, AuthError>) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|slot| {
            if slot.is_pending() {
                if let Some(result) = result.take() {
                    *slot = Slot::Done(result);
                    return true;
                }
            }
            false
        })
    }

    /// Whether the waiter has been resolved.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !self.tx.borrow().is_pending()
    }

    /// The resolved value, if any, without waiting.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, AuthError>> {
        match &*self.tx.borrow() {
            Slot::Pending => None,
            Slot::Done(result) => Some(result.clone()),
        }
    }

    /// A handle for awaiting this waiter.
    #[must_use]
    pub fn handle(&self) -> WaitHandle<T> {
        WaitHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone> Default for Waiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader side of a [`Waiter`].
#[derive(Debug, Clone)]
pub struct WaitHandle<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> WaitHandle<T> {
    /// Suspend until the waiter is resolved.
    ///
    /// # Errors
    ///
    /// Returns the error the waiter was failed with, or
    /// [`AuthError::SessionClosed`] if it was dropped while pending.
    pub async fn wait(&mut self) -> Result<T, AuthError> {
        match self.rx.wait_for(|slot| !slot.is_pending()).await {
            Ok(slot) => match &*slot {
                Slot::Done(result) => result.clone(),
                Slot::Pending => Err(AuthError::SessionClosed),
            },
            Err(_) => Err(AuthError::SessionClosed),
        }
    }
}

/// The three signals of one connection attempt.
#[derive(Debug, Default)]
pub struct SessionSignals {
    /// Set when the login URL is available.
    pub ready: Waiter<QrLogin>,
    /// Set when a remote device scanned the code.
    pub scanned: Waiter<RemoteUser>,
    /// Set when the flow concluded with a token or a cancellation.
    pub finished: Waiter<Completion>,
}

impl SessionSignals {
    /// Fresh, unresolved signals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every signal that is still pending.
    pub fn fail_pending(&self, err: &AuthError) {
        self.ready.fail(err.clone());
        self.scanned.fail(err.clone());
        self.finished.fail(err.clone());
    }
}
