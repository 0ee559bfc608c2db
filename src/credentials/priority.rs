//! Priority credential selection.

use crate::credentials::least_used::by_ratio;
use crate::credentials::{Candidate, Selector};

/// Lowest priority rank wins (1 = highest); ties go to the least used.
#[derive(Debug, Default)]
pub struct PriorityFirst;

impl Selector for PriorityFirst {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then_with(|| by_ratio(a, b)))
            .map(|(i, _)| i)
    }
}
