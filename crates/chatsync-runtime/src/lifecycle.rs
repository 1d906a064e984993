//! Engine liveness flag
//!
//! Shared by every component that can complete work asynchronously. Once the
//! engine is torn down, late completions check the flag and discard their result
//! instead of mutating state nobody observes anymore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Lifecycle {
    alive: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the engine as torn down. Returns `false` if it already was.
    pub fn shut_down(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_is_shared_and_idempotent() {
        let lifecycle = Lifecycle::new();
        let clone = lifecycle.clone();
        assert!(clone.is_alive());

        assert!(lifecycle.shut_down());
        assert!(!clone.is_alive());
        assert!(!clone.shut_down());
    }
}
