//! Selection strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::{
    least_used::LeastUsed, most_available::MostAvailable, priority::PriorityFirst, round_robin::RoundRobin,
    PoolError,
};

/// What a selector sees of an eligible credential, taken after the lazy reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: Uuid,
    pub usage: u32,
    pub limit: u32,
    pub priority: u8,
}

impl Candidate {
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        f64::from(self.usage) / f64::from(self.limit)
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.usage)
    }
}

/// Trait for credential selection algorithms.
///
/// Candidates are already filtered to eligible credentials, in pool
/// insertion order. Returns the index of the chosen candidate.
pub trait Selector: Send + Sync + fmt::Debug {
    fn select(&self, candidates: &[Candidate]) -> Option<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    RoundRobin,
    #[default]
    LeastUsed,
    Priority,
    MostAvailable,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::LeastUsed => "least_used",
            SelectionStrategy::Priority => "priority",
            SelectionStrategy::MostAvailable => "most_available",
        }
    }

    /// Fresh selector; round-robin starts from the first candidate.
    pub fn selector(&self) -> Box<dyn Selector> {
        match self {
            SelectionStrategy::RoundRobin => Box::new(RoundRobin::new()),
            SelectionStrategy::LeastUsed => Box::new(LeastUsed),
            SelectionStrategy::Priority => Box::new(PriorityFirst),
            SelectionStrategy::MostAvailable => Box::new(MostAvailable),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            "least_used" => Ok(SelectionStrategy::LeastUsed),
            "priority" => Ok(SelectionStrategy::Priority),
            "most_available" => Ok(SelectionStrategy::MostAvailable),
            _ => Err(PoolError::UnknownStrategy(s.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) fn candidate(usage: u32, limit: u32, priority: u8) -> Candidate {
    Candidate {
        id: Uuid::new_v4(),
        usage,
        limit,
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!("round-robin".parse::<SelectionStrategy>(), Ok(SelectionStrategy::RoundRobin));
        assert_eq!("MOST_AVAILABLE".parse::<SelectionStrategy>(), Ok(SelectionStrategy::MostAvailable));
        assert!("random".parse::<SelectionStrategy>().is_err());
    }

    #[test]
    fn every_selector_returns_nothing_for_no_candidates() {
        for s in [
            SelectionStrategy::RoundRobin,
            SelectionStrategy::LeastUsed,
            SelectionStrategy::Priority,
            SelectionStrategy::MostAvailable,
        ] {
            assert_eq!(s.selector().select(&[]), None, "{}", s);
        }
    }
}
