//! Most-available credential selection.

use std::cmp::Reverse;

use crate::credentials::{Candidate, Selector};

/// Picks the largest absolute remaining quota.
#[derive(Debug, Default)]
pub struct MostAvailable;

impl Selector for MostAvailable {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| Reverse(c.remaining()))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::strategy::candidate;

    #[test]
    fn largest_remaining_wins_even_with_higher_ratio() {
        // remaining: 5, 400, 90
        let candidates = vec![candidate(5, 10, 1), candidate(600, 1000, 1), candidate(10, 100, 1)];
        assert_eq!(MostAvailable.select(&candidates), Some(1));
    }
}
