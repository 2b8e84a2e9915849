//! Request-scoped context
//!
//! A [`Context`] carries string metadata and an optional deadline along a
//! call. The client copies its context metadata into the request envelope
//! headers; the server derives a handler context from those headers, so
//! metadata set on one side is readable on the other.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Metadata and deadline for a single call or handler invocation
#[derive(Debug, Clone, Default)]
pub struct Context {
    metadata: HashMap<String, String>,
    deadline: Option<Instant>,
}

impl Context {
    /// An empty context with no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            metadata: HashMap::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context seeded with the given metadata
    pub fn with_metadata(metadata: HashMap<String, String>) -> Self {
        Self {
            metadata,
            deadline: None,
        }
    }

    /// All metadata entries
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Look up a single metadata value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Set a metadata value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// The absolute deadline, if one was set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    ///
    /// `None` means no deadline; a zero duration means it already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Derive a child context: this context's metadata overlaid with
    /// `headers`, keeping the parent deadline
    pub fn derive(&self, headers: &HashMap<String, String>) -> Self {
        let mut metadata = self.metadata.clone();
        for (k, v) in headers {
            metadata.insert(k.clone(), v.clone());
        }
        Self {
            metadata,
            deadline: self.deadline,
        }
    }
}
