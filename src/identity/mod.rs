//! Stable device identity for device-lock enforcement.
//!
//! Mints a random opaque token on first run, stores it in the `settings`
//! table, and returns the same value on every subsequent startup. Accounts
//! are bound to this token; there is no way to forge another device's
//! identity short of copying its database.

use anyhow::Result;
use uuid::Uuid;

use crate::storage::Storage;

const SETTING_KEY: &str = "device_id";

/// Returns the stable device identity string.
///
/// On first call it generates a random UUID, stores it in the `settings`
/// table, and returns it. On every subsequent call it reads and returns the
/// stored value.
pub async fn get_or_create(storage: &Storage) -> Result<String> {
    if let Some(id) = storage.get_setting(SETTING_KEY).await? {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    storage.set_setting(SETTING_KEY, &id).await?;
    Ok(id)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
