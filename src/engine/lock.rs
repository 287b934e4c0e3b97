//! Stack lock files.
//!
//! A lock file next to the stack state keeps separate processes sharing a
//! workspace from mutating one stack at the same time. Locks expire so that a
//! crashed holder does not wedge the stack forever.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workspace::StackKey;

/// Lock expiry in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Contents of a stack lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Identifies this acquisition; release must present it.
    pub lock_id: String,
    /// Stack the lock guards, as `project/stack`.
    pub stack: String,
    /// Process holding the lock.
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// After this instant any process may take the lock over.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// A fresh lock on `key` for `holder`.
    #[must_use]
    pub fn new(key: &StackKey, holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            stack: key.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Returns true once the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before expiry, zero if already expired.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Holder id for this process: `hostname-pid-uuid8`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().into_owned());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StackKey {
        StackKey::new("carlos-ubuntu18.04-01-02-2024", "slack-vms")
    }

    #[test]
    fn test_new_lock_guards_its_stack() {
        let lock = LockInfo::new(&key(), "worker-1");
        assert_eq!(lock.stack, "slack-vms/carlos-ubuntu18.04-01-02-2024");
        assert_eq!(lock.holder, "worker-1");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new(&key(), "worker-1");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_ids_are_unique_per_call() {
        let first = generate_holder_id();
        assert_ne!(first, generate_holder_id());
        assert!(first.contains(&format!("-{}-", std::process::id())));
    }
}
