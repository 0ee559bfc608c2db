//! Round-robin credential selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::credentials::{Candidate, Selector};

/// Round-robin selector.
/// Stores an internal counter to rotate through the eligible set.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(n % candidates.len())
    }
}
