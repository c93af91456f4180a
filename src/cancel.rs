//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns the right to cancel; the
//! [`CancellationSignal`] it hands out is a read-only view that can be cloned
//! freely and stored in a workflow [`Context`](crate::Context). Cancelling
//! never interrupts running work: the engine polls the signal between step
//! attempts.

use crate::error::WorkflowError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

type Observer = Arc<dyn Fn(&Cancelled) + Send + Sync>;

/// Error value handed to cancellation observers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Cancelled {
    reason: String,
}

impl Cancelled {
    /// Creates a cancellation error with the given, already formatted, reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the formatted reason, e.g. `"cancelled: timed out after 50ms"`.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Default)]
struct SignalState {
    reason: Mutex<Option<String>>,
    observers: Mutex<Vec<Observer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only handle on a cancellation flag.
///
/// # Examples
///
/// ```
/// use ireko::CancellationSource;
///
/// let source = CancellationSource::new();
/// let signal = source.signal();
/// assert!(!signal.is_cancelled());
///
/// source.cancel_with("user abort");
/// assert!(signal.is_cancelled());
/// assert_eq!(signal.reason().as_deref(), Some("cancelled: user abort"));
/// ```
#[derive(Clone, Default)]
pub struct CancellationSignal {
    state: Arc<SignalState>,
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("reason", &*lock(&self.state.reason))
            .field("observers", &lock(&self.state.observers).len())
            .finish()
    }
}

impl CancellationSignal {
    /// Returns `true` once the owning source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.state.reason).is_some()
    }

    /// Returns the formatted cancellation reason, if cancelled.
    pub fn reason(&self) -> Option<String> {
        lock(&self.state.reason).clone()
    }

    /// Returns `Err` if the signal has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        match self.reason() {
            Some(reason) => Err(Cancelled::new(reason)),
            None => Ok(()),
        }
    }

    /// Registers an observer called on every subsequent cancel.
    ///
    /// Observers registered after a cancellation are not called for it; they
    /// only see later cancel calls.
    pub fn on_cancel<F>(&self, observer: F)
    where
        F: Fn(&Cancelled) + Send + Sync + 'static,
    {
        lock(&self.state.observers).push(Arc::new(observer));
    }

    fn trigger(&self, reason: Option<&str>) {
        let reason = match reason {
            Some(reason) => format!("cancelled: {}", reason),
            None => "cancelled".to_string(),
        };
        *lock(&self.state.reason) = Some(reason.clone());

        // Snapshot so observers may touch the signal without deadlocking.
        let observers = lock(&self.state.observers).clone();
        let cancelled = Cancelled::new(reason);
        for observer in observers {
            observer(&cancelled);
        }
    }
}

#[derive(Serialize)]
struct SignalSnapshot {
    cancelled: bool,
}

impl Serialize for CancellationSignal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SignalSnapshot {
            cancelled: self.is_cancelled(),
        }
        .serialize(serializer)
    }
}

/// The owner of a [`CancellationSignal`], and the only way to cancel it.
#[derive(Debug, Default)]
pub struct CancellationSource {
    signal: CancellationSignal,
}

impl CancellationSource {
    /// Creates a source with a fresh, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source whose signal cancels itself after `duration`.
    ///
    /// The timer runs on the current tokio runtime. Outside of one this fails
    /// with [`WorkflowError::Configuration`].
    pub fn with_timeout(duration: Duration) -> Result<Self, WorkflowError> {
        let source = Self::new();
        spawn_timeout(source.signal(), duration)?;
        Ok(source)
    }

    /// Returns a read-only handle on this source's signal.
    pub fn signal(&self) -> CancellationSignal {
        self.signal.clone()
    }

    /// Returns `true` once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Cancels with the plain reason `"cancelled"`.
    ///
    /// Every call re-notifies all observers registered so far.
    pub fn cancel(&self) {
        self.signal.trigger(None);
    }

    /// Cancels with the reason `"cancelled: <reason>"`.
    ///
    /// A later call replaces the reason and re-notifies all observers.
    pub fn cancel_with(&self, reason: impl AsRef<str>) {
        self.signal.trigger(Some(reason.as_ref()));
    }
}

/// Returns a signal that cancels itself after `duration`.
///
/// Fails with [`WorkflowError::Configuration`] outside of a tokio runtime.
///
/// ```
/// use ireko::cancel_after;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let signal = cancel_after(Duration::from_millis(10)).expect("inside a runtime");
/// tokio::time::sleep(Duration::from_millis(50)).await;
/// assert_eq!(signal.reason().as_deref(), Some("cancelled: timed out after 10ms"));
/// # }
/// ```
pub fn cancel_after(duration: Duration) -> Result<CancellationSignal, WorkflowError> {
    CancellationSource::with_timeout(duration).map(|source| source.signal())
}

fn spawn_timeout(signal: CancellationSignal, duration: Duration) -> Result<(), WorkflowError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|e| {
        WorkflowError::Configuration(format!("Cancellation timer needs a tokio runtime: {}", e))
    })?;
    handle.spawn(async move {
        tokio::time::sleep(duration).await;
        tracing::debug!("Cancellation timer fired after {:?}", duration);
        signal.trigger(Some(format!("timed out after {}ms", duration.as_millis()).as_str()));
    });
    Ok(())
}
