//! Command tag sequence.
//!
//! Tags match commands with their completions. The engine is strictly
//! serial, so a plain monotone counter is enough; tags are the decimal
//! counter value, starting at 1.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotone tag sequence for one session.
#[derive(Debug)]
pub struct TagSequence {
    counter: AtomicU32,
}

impl TagSequence {
    /// Creates a new sequence; the first tag issued is "1".
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(1),
        }
    }

    /// Issues the next tag.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        n.to_string()
    }

    /// Returns the value the next tag will have.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for TagSequence {
    fn default() -> Self {
        Self::new()
    }
}
