use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

/// A one-time (or usage-limited) credential exchanged for an agent JWT at
/// enrolment (spec §3, §4.5). Plaintext is returned only at creation; the
/// repository stores `key_hash` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key_hash: String,
    pub usage_limit: u32,
    pub usage_count: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InstallationKey {
    pub fn new(tenant_id: Uuid, key_hash: String, usage_limit: u32, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self> {
        if usage_limit == 0 {
            return Err(Error::validation("usage_limit must be >= 1"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            key_hash,
            usage_limit,
            usage_count: 0,
            expires_at,
            created_at: now,
        })
    }

    /// Spec §3 / invariant 4: valid iff `usage_count < usage_limit && now <
    /// expires_at`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.usage_count < self.usage_limit && now < self.expires_at
    }

    /// Increments `usage_count` exactly once per accepted registration.
    /// Callers must have already checked `is_valid`.
    pub fn consume(&mut self) -> Result<()> {
        if self.usage_count >= self.usage_limit {
            return Err(Error::conflict("installation key usage exhausted"));
        }
        self.usage_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rejects_zero_usage_limit() {
        let now = Utc::now();
        assert!(InstallationKey::new(Uuid::new_v4(), "hash".into(), 0, now + Duration::days(1), now).is_err());
    }

    #[test]
    fn invalid_once_usage_exhausted() {
        let now = Utc::now();
        let mut key = InstallationKey::new(Uuid::new_v4(), "hash".into(), 1, now + Duration::days(1), now).expect("new");
        assert!(key.is_valid(now));
        key.consume().expect("consume");
        assert!(!key.is_valid(now));
        assert!(key.consume().is_err());
    }

    #[test]
    fn invalid_once_expired() {
        let now = Utc::now();
        let key = InstallationKey::new(Uuid::new_v4(), "hash".into(), 5, now - Duration::seconds(1), now - Duration::days(1)).expect("new");
        assert!(!key.is_valid(now));
    }
}
