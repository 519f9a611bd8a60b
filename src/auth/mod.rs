//! Login, registration, and session re-validation.
//!
//! The decision logic is pure: `evaluate_login` takes a roster snapshot and
//! returns either a denial or a grant carrying an explicit device-bind
//! command. `AuthEngine` is the thin async shell that loads state, applies
//! the bind through the roster store, and persists the session identity.
//!
//! Device binding is the sole anti-abuse mechanism for credential sharing,
//! enforced independently at registration (one free account per device) and
//! at login (one device per account).

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ReservedIdentities;
use crate::roster::{AuthUser, RosterStore};
use crate::storage::Storage;

const SESSION_KEY: &str = "session_user";

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("access denied — identity is not on the roster")]
    AccessDenied,
    #[error("account is inactive")]
    AccountInactive,
    #[error("subscription expired")]
    SubscriptionExpired,
    #[error("account is locked to another device")]
    DeviceLocked,
    #[error("username is taken")]
    UsernameTaken,
    #[error("this device is already registered to '{0}'")]
    DeviceAlreadyRegistered(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ─── Decision core ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    Vip,
    Member,
}

/// A granted login, plus the one write side effect login may carry: binding
/// the current device to a previously unclaimed roster entry. The caller
/// applies the bind; the evaluator never mutates anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginDecision {
    pub role: Role,
    pub bind_device: bool,
}

fn reserved_role(reserved: &ReservedIdentities, username: &str) -> Option<Role> {
    if username == reserved.super_admin {
        Some(Role::SuperAdmin)
    } else if username == reserved.vip {
        Some(Role::Vip)
    } else {
        None
    }
}

/// Evaluates a login attempt. Checks run in strict order, first match wins:
/// reserved identity, roster miss, inactive, expired, device mismatch.
pub fn evaluate_login(
    roster: &[AuthUser],
    reserved: &ReservedIdentities,
    username: &str,
    device_id: &str,
    now_ms: i64,
) -> Result<LoginDecision, AuthError> {
    // Reserved identities bypass every roster check, device lock included.
    if let Some(role) = reserved_role(reserved, username) {
        return Ok(LoginDecision {
            role,
            bind_device: false,
        });
    }

    let user = roster
        .iter()
        .find(|u| u.username == username)
        .ok_or(AuthError::AccessDenied)?;

    if !user.is_active {
        return Err(AuthError::AccountInactive);
    }
    if user.is_expired(now_ms) {
        return Err(AuthError::SubscriptionExpired);
    }

    match user.device_id.as_deref() {
        Some(bound) if bound != device_id => Err(AuthError::DeviceLocked),
        Some(_) => Ok(LoginDecision {
            role: Role::Member,
            bind_device: false,
        }),
        None => Ok(LoginDecision {
            role: Role::Member,
            bind_device: true,
        }),
    }
}

/// Evaluates a free-trial registration attempt. The username must be free,
/// and no *other* active entry may already hold this device.
pub fn evaluate_registration(
    roster: &[AuthUser],
    reserved: &ReservedIdentities,
    username: &str,
    device_id: &str,
) -> Result<(), AuthError> {
    if reserved.contains(username) || roster.iter().any(|u| u.username == username) {
        return Err(AuthError::UsernameTaken);
    }
    if let Some(holder) = roster
        .iter()
        .find(|u| u.is_active && u.device_id.as_deref() == Some(device_id))
    {
        return Err(AuthError::DeviceAlreadyRegistered(holder.username.clone()));
    }
    Ok(())
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// An authenticated session, freshly logged in or resumed.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub role: Role,
    /// Transcript opener. Wording surfaces elevated privilege so the front
    /// end can show it — a display concern, not a security one.
    pub welcome: String,
}

fn welcome_text(username: &str, role: Role) -> String {
    match role {
        Role::SuperAdmin => format!("Welcome, Administrator {username}. Full system access granted."),
        Role::Vip => format!("Welcome, VIP {username}. Unlimited access granted."),
        Role::Member => format!("Welcome back, {username}. System online."),
    }
}

// ─── AuthEngine ───────────────────────────────────────────────────────────────

pub struct AuthEngine {
    storage: Storage,
    roster: RosterStore,
    reserved: ReservedIdentities,
    trial_days: i64,
    device_id: String,
}

impl AuthEngine {
    pub fn new(
        storage: Storage,
        roster: RosterStore,
        reserved: ReservedIdentities,
        trial_days: i64,
        device_id: String,
    ) -> Self {
        Self {
            storage,
            roster,
            reserved,
            trial_days,
            device_id,
        }
    }

    /// Evaluates a login attempt and, on success, makes the identity the
    /// active session. An unclaimed entry is bound to this device first —
    /// routed through the roster store like every other roster write.
    pub async fn login(&self, username: &str) -> Result<Session, AuthError> {
        let users = self.roster.load().await?;
        let now = Utc::now().timestamp_millis();
        let decision = evaluate_login(&users, &self.reserved, username, &self.device_id, now)?;

        if decision.bind_device {
            let device_id = self.device_id.clone();
            self.roster
                .update_entry(username, |u| u.device_id = Some(device_id))
                .await?;
            info!(username, "bound account to this device");
        }

        self.complete_login(username, decision.role).await
    }

    /// Self-service free-trial registration: one active account per device,
    /// expiring after the configured trial period, device pre-bound. Logs
    /// the new identity in immediately.
    pub async fn register_trial(&self, username: &str) -> Result<Session, AuthError> {
        let mut users = self.roster.load().await?;
        evaluate_registration(&users, &self.reserved, username, &self.device_id)?;

        let now = Utc::now().timestamp_millis();
        users.push(AuthUser {
            username: username.to_string(),
            is_unlimited: false,
            expiry_date: Some(now + self.trial_days * 86_400_000),
            is_active: true,
            created_at: now,
            device_id: Some(self.device_id.clone()),
            is_free_trial: Some(true),
        });
        self.roster.save(&users).await?;
        info!(username, "registered free-trial account");

        self.complete_login(username, Role::Member).await
    }

    /// Restores the persisted session, re-running the login checks against
    /// the *persisted* roster so administrative changes made elsewhere take
    /// effect. On any failure the session is torn down and the reason
    /// surfaced. Returns `Ok(None)` when nobody is logged in.
    pub async fn resume(&self) -> Result<Option<Session>, AuthError> {
        let Some(username) = self.storage.get_setting(SESSION_KEY).await? else {
            return Ok(None);
        };

        if let Some(role) = reserved_role(&self.reserved, &username) {
            return Ok(Some(Session {
                welcome: welcome_text(&username, role),
                username,
                role,
            }));
        }

        let users = self.roster.load().await?;
        let now = Utc::now().timestamp_millis();
        match evaluate_login(&users, &self.reserved, &username, &self.device_id, now) {
            // Resume never claims a device — binding is a login-time effect.
            Ok(decision) => Ok(Some(Session {
                welcome: welcome_text(&username, decision.role),
                username,
                role: decision.role,
            })),
            Err(e) => {
                self.logout().await?;
                warn!(username = %username, reason = %e, "stored session invalidated");
                Err(e)
            }
        }
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.storage.delete_setting(SESSION_KEY).await?;
        Ok(())
    }

    /// Unlimited status is the union of reserved-identity membership and the
    /// roster entry's own flag.
    pub async fn is_unlimited(&self, username: &str) -> Result<bool, AuthError> {
        if self.reserved.contains(username) {
            return Ok(true);
        }
        Ok(self
            .roster
            .find(username)
            .await?
            .map(|u| u.is_unlimited)
            .unwrap_or(false))
    }

    async fn complete_login(&self, username: &str, role: Role) -> Result<Session, AuthError> {
        self.storage.set_setting(SESSION_KEY, username).await?;
        Ok(Session {
            username: username.to_string(),
            role,
            welcome: welcome_text(username, role),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved() -> ReservedIdentities {
        ReservedIdentities {
            super_admin: "root".to_string(),
            vip: "guest-of-honor".to_string(),
        }
    }

    fn member(username: &str) -> AuthUser {
        AuthUser {
            username: username.to_string(),
            is_unlimited: false,
            expiry_date: None,
            is_active: true,
            created_at: 0,
            device_id: None,
            is_free_trial: None,
        }
    }

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn reserved_identity_bypasses_all_checks() {
        // Empty roster, mismatched device — reserved names still get in.
        let decision = evaluate_login(&[], &reserved(), "root", "dev-a", NOW).unwrap();
        assert_eq!(decision.role, Role::SuperAdmin);
        assert!(!decision.bind_device);

        let decision = evaluate_login(&[], &reserved(), "guest-of-honor", "dev-a", NOW).unwrap();
        assert_eq!(decision.role, Role::Vip);
    }

    #[test]
    fn unknown_identity_is_denied() {
        assert!(matches!(
            evaluate_login(&[], &reserved(), "stranger", "dev-a", NOW),
            Err(AuthError::AccessDenied)
        ));
    }

    #[test]
    fn check_order_is_inactive_before_expired_before_device() {
        let mut user = member("u");
        user.is_active = false;
        user.expiry_date = Some(NOW - 1);
        user.device_id = Some("other".to_string());
        let roster = [user];

        assert!(matches!(
            evaluate_login(&roster, &reserved(), "u", "dev-a", NOW),
            Err(AuthError::AccountInactive)
        ));

        let mut user = roster[0].clone();
        user.is_active = true;
        assert!(matches!(
            evaluate_login(&[user.clone()], &reserved(), "u", "dev-a", NOW),
            Err(AuthError::SubscriptionExpired)
        ));

        user.expiry_date = None;
        assert!(matches!(
            evaluate_login(&[user], &reserved(), "u", "dev-a", NOW),
            Err(AuthError::DeviceLocked)
        ));
    }

    #[test]
    fn expired_beats_active_flag() {
        let mut user = member("u");
        user.expiry_date = Some(NOW);
        assert!(matches!(
            evaluate_login(&[user], &reserved(), "u", "dev-a", NOW),
            Err(AuthError::SubscriptionExpired)
        ));
    }

    #[test]
    fn unclaimed_entry_requests_device_bind() {
        let decision = evaluate_login(&[member("u")], &reserved(), "u", "dev-a", NOW).unwrap();
        assert!(decision.bind_device);

        let mut user = member("u");
        user.device_id = Some("dev-a".to_string());
        let decision = evaluate_login(&[user], &reserved(), "u", "dev-a", NOW).unwrap();
        assert!(!decision.bind_device);
    }

    #[test]
    fn registration_rejects_taken_and_reserved_names() {
        assert!(matches!(
            evaluate_registration(&[member("u")], &reserved(), "u", "dev-a"),
            Err(AuthError::UsernameTaken)
        ));
        assert!(matches!(
            evaluate_registration(&[], &reserved(), "root", "dev-a"),
            Err(AuthError::UsernameTaken)
        ));
    }

    #[test]
    fn registration_names_the_blocking_account() {
        let mut holder = member("guest1");
        holder.device_id = Some("dev-a".to_string());
        match evaluate_registration(&[holder], &reserved(), "guest2", "dev-a") {
            Err(AuthError::DeviceAlreadyRegistered(name)) => assert_eq!(name, "guest1"),
            other => panic!("expected DeviceAlreadyRegistered, got {other:?}"),
        }
    }

    #[test]
    fn inactive_holder_does_not_block_registration() {
        let mut holder = member("guest1");
        holder.device_id = Some("dev-a".to_string());
        holder.is_active = false;
        assert!(evaluate_registration(&[holder], &reserved(), "guest2", "dev-a").is_ok());
    }
}
