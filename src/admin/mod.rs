//! Roster administration.
//!
//! CRUD over roster entries with reserved-identity and duplicate guards,
//! plus the filtered/sorted listing view. Every operation presumes the
//! caller already authenticated as the super-administrator — that check
//! lives at the front-end boundary, not here.

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::config::ReservedIdentities;
use crate::roster::{AuthUser, RosterStore};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("'{0}' is a reserved system identity")]
    ReservedIdentity(String),
    #[error("user '{0}' already exists")]
    DuplicateUser(String),
    #[error("no roster entry for '{0}'")]
    UnknownUser(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ─── Listing view ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Inactive,
}

/// "Paid" is everything that is not a free trial — administrator-provisioned
/// and unlimited accounts included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanFilter {
    #[default]
    All,
    Free,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    NewestFirst,
    OldestFirst,
    Username,
    /// Closest expiry first; permanent accounts sort last.
    ExpiryAscending,
}

/// Independent, composable filters plus one sort key.
#[derive(Debug, Clone, Default)]
pub struct RosterQuery {
    /// Case-insensitive substring match on the username.
    pub search: Option<String>,
    pub status: StatusFilter,
    pub plan: PlanFilter,
    pub sort: SortKey,
}

/// Pure view over a roster snapshot — the CLI and tests share it.
pub fn filter_and_sort(users: &[AuthUser], query: &RosterQuery) -> Vec<AuthUser> {
    let needle = query
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut out: Vec<AuthUser> = users
        .iter()
        .filter(|u| {
            if let Some(needle) = &needle {
                if !u.username.to_lowercase().contains(needle.as_str()) {
                    return false;
                }
            }
            match query.status {
                StatusFilter::Active if !u.is_active => return false,
                StatusFilter::Inactive if u.is_active => return false,
                _ => {}
            }
            match query.plan {
                PlanFilter::Free if !u.free_trial() => return false,
                PlanFilter::Paid if u.free_trial() => return false,
                _ => {}
            }
            true
        })
        .cloned()
        .collect();

    match query.sort {
        SortKey::NewestFirst => out.sort_by_key(|u| std::cmp::Reverse(u.created_at)),
        SortKey::OldestFirst => out.sort_by_key(|u| u.created_at),
        SortKey::Username => out.sort_by(|a, b| a.username.cmp(&b.username)),
        SortKey::ExpiryAscending => out.sort_by_key(|u| u.expiry_date.unwrap_or(i64::MAX)),
    }
    out
}

// ─── Two-phase delete ─────────────────────────────────────────────────────────

/// A requested deletion. Nothing is removed until this is passed back to
/// `confirm_delete` — a single call can never drop an entry.
#[derive(Debug)]
#[must_use = "deletion does not happen until confirmed"]
pub struct DeleteRequest {
    username: String,
}

impl DeleteRequest {
    pub fn username(&self) -> &str {
        &self.username
    }
}

// ─── AdminSurface ─────────────────────────────────────────────────────────────

pub struct AdminSurface {
    roster: RosterStore,
    reserved: ReservedIdentities,
}

impl AdminSurface {
    pub fn new(roster: RosterStore, reserved: ReservedIdentities) -> Self {
        Self { roster, reserved }
    }

    /// Creates an active, unclaimed, non-trial entry. A positive duration
    /// sets the expiry that many days out; none means permanent.
    pub async fn add_user(
        &self,
        username: &str,
        is_unlimited: bool,
        duration_days: Option<u32>,
    ) -> Result<AuthUser, AdminError> {
        if self.reserved.contains(username) {
            return Err(AdminError::ReservedIdentity(username.to_string()));
        }
        let mut users = self.roster.load().await?;
        if users.iter().any(|u| u.username == username) {
            return Err(AdminError::DuplicateUser(username.to_string()));
        }

        let now = Utc::now().timestamp_millis();
        let user = AuthUser {
            username: username.to_string(),
            is_unlimited,
            expiry_date: expiry_from_days(duration_days, now),
            is_active: true,
            created_at: now,
            device_id: None,
            is_free_trial: Some(false),
        };
        users.push(user.clone());
        self.roster.save(&users).await?;
        info!(username, "added roster entry");
        Ok(user)
    }

    /// Mutates only the unlimited flag and the recomputed expiry. Username,
    /// device binding, creation time, and trial status are immutable here.
    pub async fn update_user(
        &self,
        username: &str,
        is_unlimited: bool,
        duration_days: Option<u32>,
    ) -> Result<AuthUser, AdminError> {
        let now = Utc::now().timestamp_millis();
        let expiry = expiry_from_days(duration_days, now);
        let mut users = self.roster.load().await?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| AdminError::UnknownUser(username.to_string()))?;
        user.is_unlimited = is_unlimited;
        user.expiry_date = expiry;
        let updated = user.clone();
        self.roster.save(&users).await?;
        Ok(updated)
    }

    /// Flips the kill switch; returns the new state.
    pub async fn toggle_active(&self, username: &str) -> Result<bool, AdminError> {
        let mut users = self.roster.load().await?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| AdminError::UnknownUser(username.to_string()))?;
        user.is_active = !user.is_active;
        let state = user.is_active;
        self.roster.save(&users).await?;
        info!(username, active = state, "toggled account status");
        Ok(state)
    }

    /// Clears the device lock; the next successful login from any device
    /// re-binds the entry.
    pub async fn unlink_device(&self, username: &str) -> Result<(), AdminError> {
        let mut users = self.roster.load().await?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| AdminError::UnknownUser(username.to_string()))?;
        user.device_id = None;
        self.roster.save(&users).await?;
        info!(username, "unlinked device");
        Ok(())
    }

    /// Phase one of deletion: no mutation, just a token the caller must
    /// hand back after the user confirms.
    pub fn request_delete(&self, username: &str) -> DeleteRequest {
        DeleteRequest {
            username: username.to_string(),
        }
    }

    /// Phase two: actually removes the entry. The quota counter for the
    /// name is intentionally left behind — re-adding the username must not
    /// refund consumed quota.
    pub async fn confirm_delete(&self, request: DeleteRequest) -> Result<(), AdminError> {
        let mut users = self.roster.load().await?;
        let before = users.len();
        users.retain(|u| u.username != request.username);
        if users.len() == before {
            return Err(AdminError::UnknownUser(request.username));
        }
        self.roster.save(&users).await?;
        info!(username = %request.username, "deleted roster entry");
        Ok(())
    }

    pub async fn list(&self, query: &RosterQuery) -> Result<Vec<AuthUser>, AdminError> {
        Ok(filter_and_sort(&self.roster.load().await?, query))
    }
}

fn expiry_from_days(duration_days: Option<u32>, now_ms: i64) -> Option<i64> {
    duration_days
        .filter(|d| *d > 0)
        .map(|d| now_ms + i64::from(d) * 86_400_000)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
