//! Per-stream execution context and cooperative cancellation.
//!
//! A [`StreamContext`] is handed to every parser invocation, worker task and
//! delivery attempt of one stream. It carries the stream's property
//! snapshot (read by property locators) and the stream's
//! [`CancellationToken`].

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative halt flag shared by the owner thread, workers and the
/// delivery wrapper. Waiters wake as soon as the token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request halt. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = match self.inner.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        match self.inner.cancelled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block for up to `timeout`, returning early on cancellation.
    ///
    /// # Returns
    /// `true` if the token was cancelled before the timeout elapsed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = match self.inner.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = match self.inner.signal.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Execution context for one stream.
#[derive(Debug, Clone)]
pub struct StreamContext {
    name: Arc<str>,
    /// Keys are stored lowercased; lookups are case-insensitive.
    properties: Arc<HashMap<String, String>>,
    token: CancellationToken,
}

impl StreamContext {
    /// Create a context with a fresh cancellation token.
    ///
    /// # Example
    /// ```
    /// use activity_streams::runtime::StreamContext;
    ///
    /// let ctx = StreamContext::new("orders", [("FileName", "orders.log")]);
    /// assert_eq!(ctx.property("filename"), Some("orders.log"));
    /// ```
    pub fn new<I, K, V>(name: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::with_token(name, properties, CancellationToken::new())
    }

    pub fn with_token<I, K, V>(name: &str, properties: I, token: CancellationToken) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let properties = properties
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        Self {
            name: Arc::from(name),
            properties: Arc::new(properties),
            token,
        }
    }

    /// Context with no properties, for parsing outside a running stream.
    pub fn empty() -> Self {
        Self::new("", std::iter::empty::<(&str, String)>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream property by case-insensitive name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_halted(&self) -> bool {
        self.token.is_cancelled()
    }
}
