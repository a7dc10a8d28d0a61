//! Key and model rotation.
//!
//! The rotation state owns the configured API keys and a cursor naming the
//! key to try first. Each request walks an [`AttemptPlan`]: every key in turn
//! starting at the cursor, and for each key every model in order. A
//! successful request moves the cursor past the key that served it so load
//! spreads across keys over time.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An API key that never prints its secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "ApiKey(...{tail})")
    }
}

/// Shared rotation cursor over the configured keys.
#[derive(Debug)]
pub struct RotationState {
    keys: Vec<ApiKey>,
    cursor: AtomicUsize,
}

impl RotationState {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the key the next plan starts with.
    pub fn cursor(&self) -> usize {
        match self.keys.len() {
            0 => 0,
            n => self.cursor.load(Ordering::Relaxed) % n,
        }
    }

    /// Start walking keys and `model_count` models from the current cursor.
    pub fn plan(&self, model_count: usize) -> AttemptPlan<'_> {
        AttemptPlan {
            state: self,
            start: self.cursor(),
            model_count,
            key_offset: 0,
            model_index: 0,
        }
    }

    /// Record that `key_index` served a request.
    pub fn record_success(&self, key_index: usize) {
        if !self.keys.is_empty() {
            self.cursor
                .store((key_index + 1) % self.keys.len(), Ordering::Relaxed);
        }
    }
}

/// One key/model pairing to try.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub key_index: usize,
    pub key: &'a ApiKey,
    pub model_index: usize,
}

/// Ordered walk over key/model pairs for a single request.
#[derive(Debug)]
pub struct AttemptPlan<'a> {
    state: &'a RotationState,
    start: usize,
    model_count: usize,
    key_offset: usize,
    model_index: usize,
}

impl<'a> AttemptPlan<'a> {
    /// Next key/model pair, or `None` when every pairing has been tried.
    pub fn next_attempt(&mut self) -> Option<Attempt<'a>> {
        let key_count = self.state.keys.len();
        if self.model_count == 0 {
            return None;
        }
        while self.key_offset < key_count {
            if self.model_index < self.model_count {
                let key_index = (self.start + self.key_offset) % key_count;
                let attempt = Attempt {
                    key_index,
                    key: &self.state.keys[key_index],
                    model_index: self.model_index,
                };
                self.model_index += 1;
                return Some(attempt);
            }
            self.skip_key();
        }
        None
    }

    /// Abandon the remaining models of the current key.
    pub fn skip_key(&mut self) {
        self.key_offset += 1;
        self.model_index = 0;
    }
}
