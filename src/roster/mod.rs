//! Authoritative roster of authorized accounts.
//!
//! The roster is persisted as one JSON array under a single settings key, so
//! every mutation is an atomic full-array write. A legacy schema (a bare list
//! of usernames) is migrated to the current shape on first read; the legacy
//! key is never written again.
//!
//! Corrupt stored data collapses to an empty roster instead of an error: bad
//! local state must never take down the login flow. The parse failure is
//! still visible — `load` logs it at WARN.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::Storage;

const ROSTER_KEY: &str = "roster";
const LEGACY_ROSTER_KEY: &str = "authorized_users";

// ─── AuthUser ─────────────────────────────────────────────────────────────────

/// One roster entry. Serialized camelCase; `device_id` and `is_free_trial`
/// are omitted entirely when unset (absent, not null), while a permanent
/// account keeps an explicit `"expiryDate": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Unique key within the roster, matched case-sensitively.
    pub username: String,
    /// Bypasses message-quota enforcement.
    pub is_unlimited: bool,
    /// Epoch milliseconds; `None` means the account never expires.
    pub expiry_date: Option<i64>,
    /// Administrative kill switch.
    pub is_active: bool,
    /// Epoch milliseconds at creation.
    pub created_at: i64,
    /// Set by the first successful login; cleared only by unlink or delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Present on self-registered trial accounts; absent on
    /// administrator-provisioned ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_free_trial: Option<bool>,
}

impl AuthUser {
    /// Expiry is evaluated lazily — nothing purges expired entries.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expiry_date, Some(t) if t <= now_ms)
    }

    pub fn free_trial(&self) -> bool {
        self.is_free_trial.unwrap_or(false)
    }
}

// ─── RosterStore ──────────────────────────────────────────────────────────────

/// Owner of the persisted roster. Every component reads through `load` and
/// writes through `save`/`update_entry` — nothing else touches the key.
#[derive(Clone)]
pub struct RosterStore {
    storage: Storage,
}

impl RosterStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Reads the current roster, migrating the legacy bare-name list on
    /// first read. Malformed stored data yields an empty roster.
    pub async fn load(&self) -> Result<Vec<AuthUser>> {
        if let Some(raw) = self.storage.get_setting(ROSTER_KEY).await? {
            return Ok(match parse_roster(&raw) {
                Ok(users) => users,
                Err(e) => {
                    warn!(err = %e, "stored roster is malformed — treating as empty");
                    Vec::new()
                }
            });
        }

        // One-time migration: synthesize full entries from the bare list.
        if let Some(raw) = self.storage.get_setting(LEGACY_ROSTER_KEY).await? {
            let names: Vec<String> = match serde_json::from_str(&raw) {
                Ok(names) => names,
                Err(e) => {
                    warn!(err = %e, "legacy roster is malformed — treating as empty");
                    return Ok(Vec::new());
                }
            };
            let now = Utc::now().timestamp_millis();
            let migrated: Vec<AuthUser> = names
                .into_iter()
                .map(|username| AuthUser {
                    username,
                    is_unlimited: false,
                    expiry_date: None,
                    is_active: true,
                    created_at: now,
                    device_id: None,
                    is_free_trial: None,
                })
                .collect();
            self.save(&migrated).await?;
            info!(count = migrated.len(), "migrated legacy roster");
            return Ok(migrated);
        }

        Ok(Vec::new())
    }

    /// Replaces the entire persisted roster in a single write.
    pub async fn save(&self, users: &[AuthUser]) -> Result<()> {
        let raw = serde_json::to_string(users)?;
        self.storage.set_setting(ROSTER_KEY, &raw).await
    }

    pub async fn find(&self, username: &str) -> Result<Option<AuthUser>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|u| u.username == username))
    }

    /// The single mutation surface for in-place edits: load, apply the
    /// closure to the matching entry, save. Returns false when no entry
    /// matched (and nothing was written).
    pub async fn update_entry(
        &self,
        username: &str,
        apply: impl FnOnce(&mut AuthUser),
    ) -> Result<bool> {
        let mut users = self.load().await?;
        match users.iter_mut().find(|u| u.username == username) {
            Some(user) => {
                apply(user);
                self.save(&users).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Collapsed to an empty roster by `load` — kept separate so the failure
/// stays a real `Result` up to that boundary.
fn parse_roster(raw: &str) -> Result<Vec<AuthUser>, serde_json::Error> {
    serde_json::from_str(raw)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn permanent(username: &str) -> AuthUser {
        AuthUser {
            username: username.to_string(),
            is_unlimited: false,
            expiry_date: None,
            is_active: true,
            created_at: 1_700_000_000_000,
            device_id: None,
            is_free_trial: None,
        }
    }

    #[test]
    fn expiry_is_lazy_and_inclusive() {
        let mut user = permanent("nora");
        assert!(!user.is_expired(i64::MAX));

        user.expiry_date = Some(1_000);
        assert!(user.is_expired(1_000));
        assert!(user.is_expired(1_001));
        assert!(!user.is_expired(999));
    }

    #[test]
    fn unset_optionals_serialize_as_absent_not_null() {
        let raw = serde_json::to_string(&permanent("nora")).unwrap();
        assert!(!raw.contains("deviceId"));
        assert!(!raw.contains("isFreeTrial"));
        // A permanent account keeps an explicit null expiry.
        assert!(raw.contains("\"expiryDate\":null"));
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let user = AuthUser {
            username: "guest1".to_string(),
            is_unlimited: false,
            expiry_date: Some(1_700_000_600_000),
            is_active: true,
            created_at: 1_700_000_000_000,
            device_id: Some("device-a".to_string()),
            is_free_trial: Some(true),
        };
        let raw = serde_json::to_string(&user).unwrap();
        let back: AuthUser = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn legacy_shape_deserializes_without_optionals() {
        // What a migrated-then-edited roster from the old schema looks like.
        let raw = r#"{"username":"old","isUnlimited":false,"expiryDate":null,
                      "isActive":true,"createdAt":123}"#;
        let user: AuthUser = serde_json::from_str(raw).unwrap();
        assert_eq!(user.device_id, None);
        assert_eq!(user.is_free_trial, None);
    }
}
