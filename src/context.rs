//! Workflow context shared by every runner of a step tree.

use crate::cancel::CancellationSignal;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Key under which the cancellation signal is stored.
pub const CANCELLATION_KEY: &str = "cancel_token";

/// Type-safe context key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Caller data shared, unchanged, by every runner in a workflow.
///
/// The engine itself only reads the optional [`CancellationSignal`] stored
/// under [`CANCELLATION_KEY`]. All other entries are opaque. The context is
/// frozen once the workflow starts, so values that commands need to mutate
/// should be stored behind a `Mutex` or an atomic.
///
/// # Examples
///
/// ```
/// use ireko::{CancellationSource, Context};
/// use std::sync::atomic::AtomicU32;
///
/// let source = CancellationSource::new();
/// let ctx = Context::new()
///     .with("base_url", "http://localhost".to_string())
///     .with("hits", AtomicU32::new(0))
///     .with_cancellation(source.signal());
///
/// assert_eq!(ctx.get::<String>("base_url").map(String::as_str), Some("http://localhost"));
/// assert!(!ctx.is_cancelled());
/// source.cancel();
/// assert!(ctx.is_cancelled());
/// ```
pub struct Context {
    data: HashMap<ContextKey, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("cancellation", &self.cancellation())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<ContextKey>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<ContextKey>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Stores the cancellation signal polled by the retry loop.
    pub fn with_cancellation(self, signal: CancellationSignal) -> Self {
        self.with(CANCELLATION_KEY, signal)
    }

    /// Returns the value for `key`, or `None` if missing or of another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns the cancellation signal, if one was stored.
    pub fn cancellation(&self) -> Option<&CancellationSignal> {
        self.get::<CancellationSignal>(CANCELLATION_KEY)
    }

    /// Returns `true` if a cancellation signal is stored and cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation()
            .is_some_and(CancellationSignal::is_cancelled)
    }

    /// Returns `true` if the context contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries in the context.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the context contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
