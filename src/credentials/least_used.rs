//! Least-used credential selection.

use std::cmp::Ordering;

use crate::credentials::{Candidate, Selector};

/// Picks the minimal `usage / limit` ratio.
/// On a tie the earlier candidate wins (stability).
#[derive(Debug, Default)]
pub struct LeastUsed;

pub(crate) fn by_ratio(a: &Candidate, b: &Candidate) -> Ordering {
    a.ratio().partial_cmp(&b.ratio()).unwrap_or(Ordering::Equal)
}

impl Selector for LeastUsed {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| by_ratio(a, b))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::strategy::candidate;

    #[test]
    fn picks_lowest_ratio_not_lowest_usage() {
        // 50/100 = 0.5 vs 20/25 = 0.8 vs 30/1000 = 0.03
        let candidates = vec![candidate(50, 100, 1), candidate(20, 25, 1), candidate(30, 1000, 1)];
        assert_eq!(LeastUsed.select(&candidates), Some(2));
    }

    #[test]
    fn ties_keep_first() {
        let candidates = vec![candidate(1, 10, 1), candidate(2, 20, 1)];
        assert_eq!(LeastUsed.select(&candidates), Some(0));
    }
}
