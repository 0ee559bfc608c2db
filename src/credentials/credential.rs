//! A tenant-owned DataJud API identity with a daily quota.

use std::sync::Arc;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, Offset, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::{PoolError, PoolResult};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

pub type SharedCredential = Arc<Mutex<Credential>>;

/// Where the daily quota rolls over: local midnight at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRollover {
    pub utc_offset_minutes: i32,
}

impl Default for QuotaRollover {
    fn default() -> Self {
        // Brasília
        Self { utc_offset_minutes: -180 }
    }
}

impl QuotaRollover {
    pub fn utc() -> Self {
        Self { utc_offset_minutes: 0 }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// First local midnight strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = self.offset();
        let local = now.with_timezone(&offset).date_naive();
        let tomorrow = local.checked_add_days(Days::new(1)).unwrap_or(local);
        let midnight = tomorrow.and_time(NaiveTime::MIN);
        match midnight.and_local_timezone(offset).single() {
            Some(at) => at.with_timezone(&Utc),
            None => now + chrono::Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// CNPJ the API key was issued to.
    pub external_id: String,
    pub secret: String,
    pub daily_limit: u32,
    pub daily_usage: u32,
    pub reset_at: DateTime<Utc>,
    pub active: bool,
    /// 1 is the highest priority.
    pub priority: u8,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        tenant_id: Uuid,
        name: impl Into<String>,
        external_id: impl Into<String>,
        secret: impl Into<String>,
        daily_limit: u32,
        now: DateTime<Utc>,
        rollover: &QuotaRollover,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            external_id: external_id.into(),
            secret: secret.into(),
            daily_limit,
            daily_usage: 0,
            reset_at: rollover.next_after(now),
            active: true,
            priority: 5,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.set_priority(priority);
        self
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
    }

    pub fn shared(self) -> SharedCredential {
        Arc::new(Mutex::new(self))
    }

    /// Apply the lazy daily reset. Returns whether usage was zeroed.
    ///
    /// Must run before any quota read or use; every pool operation does so
    /// while holding this credential's lock.
    pub fn refresh(&mut self, now: DateTime<Utc>, rollover: &QuotaRollover) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.daily_usage = 0;
        self.reset_at = rollover.next_after(now);
        self.updated_at = now;
        true
    }

    pub fn can_make_request(&self) -> bool {
        self.active && self.daily_usage < self.daily_limit
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_usage)
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.daily_limit == 0 {
            return 1.0;
        }
        f64::from(self.daily_usage) / f64::from(self.daily_limit)
    }

    pub fn usage_percentage(&self) -> f64 {
        self.usage_ratio() * 100.0
    }

    /// Debit `amount`, refusing to cross the daily limit.
    pub fn use_quota(&mut self, amount: u32, now: DateTime<Utc>) -> PoolResult<u32> {
        if amount == 0 {
            return Err(PoolError::InvalidAmount);
        }
        let next = self.daily_usage.saturating_add(amount);
        if next > self.daily_limit {
            return Err(PoolError::QuotaExceeded {
                credential_id: self.id,
                used: self.daily_usage,
                limit: self.daily_limit,
                reset_at: self.reset_at,
            });
        }
        self.daily_usage = next;
        self.last_used_at = Some(now);
        self.updated_at = now;
        Ok(self.remaining())
    }

    pub fn reset_usage(&mut self, now: DateTime<Utc>, rollover: &QuotaRollover) {
        self.daily_usage = 0;
        self.reset_at = rollover.next_after(now);
        self.updated_at = now;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.active = true;
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
    }

    pub fn view(&self) -> CredentialView {
        CredentialView {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name.clone(),
            external_id: self.external_id.clone(),
            daily_limit: self.daily_limit,
            daily_usage: self.daily_usage,
            remaining: self.remaining(),
            usage_percentage: self.usage_percentage(),
            reset_at: self.reset_at,
            active: self.active,
            priority: self.priority,
            last_used_at: self.last_used_at,
        }
    }
}

/// Admin-facing view without the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub external_id: String,
    pub daily_limit: u32,
    pub daily_usage: u32,
    pub remaining: u32,
    pub usage_percentage: f64,
    pub reset_at: DateTime<Utc>,
    pub active: bool,
    pub priority: u8,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn rollover_is_next_local_midnight() {
        let brt = QuotaRollover::default();
        // 02:00 UTC is 23:00 the previous day in Brasília
        assert_eq!(brt.next_after(at(2024, 3, 10, 2, 0)), at(2024, 3, 10, 3, 0));
        assert_eq!(brt.next_after(at(2024, 3, 10, 3, 0)), at(2024, 3, 11, 3, 0));
        assert_eq!(QuotaRollover::utc().next_after(at(2024, 3, 10, 12, 0)), at(2024, 3, 11, 0, 0));
    }

    #[test]
    fn quota_never_exceeds_limit() {
        let now = at(2024, 1, 1, 12, 0);
        let mut c = Credential::new(Uuid::new_v4(), "main", "11222333000181", "k", 2, now, &QuotaRollover::utc());
        assert_eq!(c.use_quota(1, now), Ok(1));
        assert!(matches!(c.use_quota(2, now), Err(PoolError::QuotaExceeded { used: 1, limit: 2, .. })));
        assert_eq!(c.use_quota(1, now), Ok(0));
        assert!(!c.can_make_request());
        assert_eq!(c.use_quota(0, now), Err(PoolError::InvalidAmount));
    }

    #[test]
    fn lazy_reset_happens_once_per_rollover() {
        let rollover = QuotaRollover::utc();
        let start = at(2024, 1, 1, 23, 0);
        let mut c = Credential::new(Uuid::new_v4(), "main", "x", "k", 5, start, &rollover);
        c.use_quota(5, start).unwrap();

        let after = at(2024, 1, 2, 0, 0);
        assert!(c.refresh(after, &rollover));
        assert_eq!(c.daily_usage, 0);
        c.use_quota(3, after).unwrap();

        // later reads on the same day keep usage
        assert!(!c.refresh(at(2024, 1, 2, 18, 0), &rollover));
        assert_eq!(c.daily_usage, 3);
        assert_eq!(c.reset_at, at(2024, 1, 3, 0, 0));
    }

    #[test]
    fn priority_is_clamped() {
        let now = Utc::now();
        let c = Credential::new(Uuid::new_v4(), "a", "x", "k", 1, now, &QuotaRollover::utc()).with_priority(0);
        assert_eq!(c.priority, 1);
        let c = c.with_priority(42);
        assert_eq!(c.priority, 10);
    }

    #[test]
    fn view_hides_secret() {
        let now = Utc::now();
        let c = Credential::new(Uuid::new_v4(), "a", "x", "super-secret", 10, now, &QuotaRollover::utc());
        let json = serde_json::to_string(&c.view()).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
