//! Per-user message allowance tracking.
//!
//! One persisted counter per username, independent of the roster, compared
//! against an injected cap. Counters only ever go up — nothing in-product
//! decrements them, and deleting a roster entry leaves its counter behind so
//! re-adding the name does not refund consumed quota.

use anyhow::Result;

use crate::storage::Storage;

const COUNT_KEY_PREFIX: &str = "msg_count_";

/// Who is asking: the username plus its resolved unlimited status (the union
/// of reserved-identity membership and the roster's `is_unlimited` flag).
#[derive(Debug, Clone)]
pub struct Subject {
    pub username: String,
    pub unlimited: bool,
}

#[derive(Clone)]
pub struct QuotaTracker {
    storage: Storage,
    cap: u32,
}

impl QuotaTracker {
    pub fn new(storage: Storage, cap: u32) -> Self {
        Self { storage, cap }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Messages this username has ever sent. Unparseable stored values count
    /// as zero.
    pub async fn count(&self, username: &str) -> Result<u32> {
        Ok(self
            .storage
            .get_setting(&count_key(username))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Remaining allowance; `None` for unlimited subjects.
    pub async fn remaining(&self, subject: &Subject) -> Result<Option<u32>> {
        if subject.unlimited {
            return Ok(None);
        }
        let used = self.count(&subject.username).await?;
        Ok(Some(self.cap.saturating_sub(used)))
    }

    /// Hard stop: once true, no further outbound message may be composed.
    pub async fn is_limit_reached(&self, subject: &Subject) -> Result<bool> {
        if subject.unlimited {
            return Ok(false);
        }
        Ok(self.count(&subject.username).await? >= self.cap)
    }

    /// Counts one accepted outbound message. Callers must check
    /// `is_limit_reached` first — a rejected message is never recorded.
    /// No-op for unlimited subjects.
    pub async fn record_usage(&self, subject: &Subject) -> Result<()> {
        if subject.unlimited {
            return Ok(());
        }
        let next = self.count(&subject.username).await? + 1;
        self.storage
            .set_setting(&count_key(&subject.username), &next.to_string())
            .await
    }
}

fn count_key(username: &str) -> String {
    format!("{COUNT_KEY_PREFIX}{username}")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
