//! Stateless decision functions injected into the orchestrator and queues.
//!
//! # Design Decisions
//! - Policy is a trait object so priority and freshness rules can change
//!   without touching the admission/execution mechanism
//! - The cache never consults policy; freshness is decided by the caller

use std::time::Duration;

use crate::domain::cnpj;
use crate::domain::types::{Priority, RequestType};

/// Why a field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub trait DomainPolicy: Send + Sync + std::fmt::Debug {
    fn calculate_priority(&self, request_type: RequestType, urgent: bool) -> Priority;

    /// Whether a cached value of the given age may still be served.
    fn should_use_cache(&self, request_type: RequestType, age: Duration) -> bool;

    fn estimate_duration(&self, request_type: RequestType) -> Duration;

    fn validate_process_number(&self, process_number: &str) -> Result<(), ValidationError>;

    fn validate_cnpj(&self, cnpj: &str) -> Result<(), ValidationError>;
}

/// Rules used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl DefaultPolicy {
    pub const MIN_PROCESS_NUMBER_LEN: usize = 20;

    pub fn max_cache_age(request_type: RequestType) -> Duration {
        match request_type {
            RequestType::Process => Duration::from_secs(60 * 60),
            RequestType::Movement => Duration::from_secs(30 * 60),
            RequestType::Party => Duration::from_secs(2 * 60 * 60),
            RequestType::Document => Duration::from_secs(24 * 60 * 60),
            RequestType::Bulk => Duration::from_secs(15 * 60),
        }
    }
}

impl DomainPolicy for DefaultPolicy {
    fn calculate_priority(&self, request_type: RequestType, urgent: bool) -> Priority {
        if urgent {
            return Priority::Urgent;
        }
        match request_type {
            RequestType::Bulk => Priority::Low,
            RequestType::Process => Priority::High,
            RequestType::Movement | RequestType::Party | RequestType::Document => Priority::Normal,
        }
    }

    fn should_use_cache(&self, request_type: RequestType, age: Duration) -> bool {
        age <= Self::max_cache_age(request_type)
    }

    fn estimate_duration(&self, request_type: RequestType) -> Duration {
        match request_type {
            RequestType::Process => Duration::from_secs(5),
            RequestType::Movement => Duration::from_secs(3),
            RequestType::Party => Duration::from_secs(2),
            RequestType::Document => Duration::from_secs(10),
            RequestType::Bulk => Duration::from_secs(30),
        }
    }

    fn validate_process_number(&self, process_number: &str) -> Result<(), ValidationError> {
        let compact: String = process_number.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() < Self::MIN_PROCESS_NUMBER_LEN {
            return Err(ValidationError::new(
                "process_number",
                format!("expected at least {} characters", Self::MIN_PROCESS_NUMBER_LEN),
            ));
        }
        Ok(())
    }

    fn validate_cnpj(&self, value: &str) -> Result<(), ValidationError> {
        if cnpj::is_valid(value) {
            Ok(())
        } else {
            Err(ValidationError::new("cnpj", "invalid format or check digits"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rules() {
        let p = DefaultPolicy;
        assert_eq!(p.calculate_priority(RequestType::Party, true), Priority::Urgent);
        assert_eq!(p.calculate_priority(RequestType::Bulk, false), Priority::Low);
        assert_eq!(p.calculate_priority(RequestType::Process, false), Priority::High);
        assert_eq!(p.calculate_priority(RequestType::Movement, false), Priority::Normal);
    }

    #[test]
    fn process_data_stays_fresh_longer_than_movements() {
        let p = DefaultPolicy;
        let forty_minutes = Duration::from_secs(40 * 60);
        assert!(p.should_use_cache(RequestType::Process, forty_minutes));
        assert!(!p.should_use_cache(RequestType::Movement, forty_minutes));
    }

    #[test]
    fn process_number_length() {
        let p = DefaultPolicy;
        assert!(p.validate_process_number("0001234-56.2023.8.26.0100").is_ok());
        assert!(p.validate_process_number("123").is_err());
    }
}
