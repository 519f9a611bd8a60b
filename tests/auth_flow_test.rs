//! End-to-end authorization flows over a real temp-dir database: login,
//! device binding, free-trial registration, and session re-validation.

use chrono::Utc;
use redgate::auth::{AuthEngine, AuthError, Role};
use redgate::config::{GateConfig, ProviderConfig, ReservedIdentities};
use redgate::AppContext;

fn test_config(data_dir: &std::path::Path) -> GateConfig {
    GateConfig {
        data_dir: data_dir.to_path_buf(),
        log: "warn".to_string(),
        reserved: ReservedIdentities {
            super_admin: "root-admin".to_string(),
            vip: "vip-guest".to_string(),
        },
        message_cap: 10,
        trial_days: 7,
        provider: ProviderConfig::default(),
    }
}

async fn setup() -> (tempfile::TempDir, AppContext) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = AppContext::init(test_config(dir.path())).await.unwrap();
    (dir, ctx)
}

/// A second engine over the same database, pretending to be another device.
fn engine_on_device(ctx: &AppContext, device_id: &str) -> AuthEngine {
    AuthEngine::new(
        ctx.storage.clone(),
        ctx.roster.clone(),
        ctx.config.reserved.clone(),
        ctx.config.trial_days,
        device_id.to_string(),
    )
}

#[tokio::test]
async fn added_user_logs_in_immediately() {
    let (_dir, ctx) = setup().await;
    let before = Utc::now().timestamp_millis();

    let user = ctx.admin.add_user("nora", false, Some(7)).await.unwrap();
    assert_eq!(user.is_free_trial, Some(false));
    let expiry = user.expiry_date.expect("7-day account must expire");
    let expected = before + 7 * 86_400_000;
    assert!((expiry - expected).abs() < 10_000, "expiry ≈ now + 7d");

    let session = ctx.auth.login("nora").await.unwrap();
    assert_eq!(session.role, Role::Member);
    assert_eq!(session.username, "nora");
    assert!(session.welcome.contains("nora"));
}

#[tokio::test]
async fn expired_account_cannot_log_in_even_while_active() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();
    ctx.roster
        .update_entry("nora", |u| {
            u.expiry_date = Some(Utc::now().timestamp_millis() - 1)
        })
        .await
        .unwrap();

    assert!(matches!(
        ctx.auth.login("nora").await,
        Err(AuthError::SubscriptionExpired)
    ));
}

#[tokio::test]
async fn first_login_binds_the_device_and_locks_out_others() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();

    assert_eq!(ctx.roster.find("nora").await.unwrap().unwrap().device_id, None);
    ctx.auth.login("nora").await.unwrap();
    assert_eq!(
        ctx.roster.find("nora").await.unwrap().unwrap().device_id,
        Some(ctx.device_id.clone())
    );

    // Same device logs in again; a different device is locked out.
    ctx.auth.login("nora").await.unwrap();
    let other = engine_on_device(&ctx, "other-device");
    assert!(matches!(other.login("nora").await, Err(AuthError::DeviceLocked)));
}

#[tokio::test]
async fn unlink_allows_exactly_one_new_device_to_bind() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();
    ctx.auth.login("nora").await.unwrap();

    ctx.admin.unlink_device("nora").await.unwrap();

    let other = engine_on_device(&ctx, "other-device");
    other.login("nora").await.unwrap();
    assert_eq!(
        ctx.roster.find("nora").await.unwrap().unwrap().device_id,
        Some("other-device".to_string())
    );

    // The original device is now the locked-out one.
    assert!(matches!(
        ctx.auth.login("nora").await,
        Err(AuthError::DeviceLocked)
    ));
}

#[tokio::test]
async fn trial_registration_creates_a_bound_expiring_account() {
    let (_dir, ctx) = setup().await;
    let before = Utc::now().timestamp_millis();

    let session = ctx.auth.register_trial("guest1").await.unwrap();
    assert_eq!(session.role, Role::Member);

    let user = ctx.roster.find("guest1").await.unwrap().unwrap();
    assert_eq!(user.is_free_trial, Some(true));
    assert!(user.is_active);
    assert_eq!(user.device_id, Some(ctx.device_id.clone()));
    let expiry = user.expiry_date.expect("trials expire");
    assert!((expiry - (before + 7 * 86_400_000)).abs() < 10_000);

    // Registration logs the identity in.
    let resumed = ctx.auth.resume().await.unwrap().unwrap();
    assert_eq!(resumed.username, "guest1");
}

#[tokio::test]
async fn one_active_trial_per_device() {
    let (_dir, ctx) = setup().await;
    ctx.auth.register_trial("guest1").await.unwrap();

    match ctx.auth.register_trial("guest2").await {
        Err(AuthError::DeviceAlreadyRegistered(blocking)) => assert_eq!(blocking, "guest1"),
        other => panic!("expected DeviceAlreadyRegistered, got {other:?}"),
    }

    // Deactivating the holder frees the device.
    ctx.admin.toggle_active("guest1").await.unwrap();
    ctx.auth.register_trial("guest2").await.unwrap();
}

#[tokio::test]
async fn taken_usernames_cannot_be_registered() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();

    assert!(matches!(
        ctx.auth.register_trial("nora").await,
        Err(AuthError::UsernameTaken)
    ));
    assert!(matches!(
        ctx.auth.register_trial("root-admin").await,
        Err(AuthError::UsernameTaken)
    ));
}

#[tokio::test]
async fn reserved_identities_log_in_against_an_empty_roster() {
    let (_dir, ctx) = setup().await;

    let admin = ctx.auth.login("root-admin").await.unwrap();
    assert_eq!(admin.role, Role::SuperAdmin);
    assert!(admin.welcome.contains("Administrator"));

    let vip = ctx.auth.login("vip-guest").await.unwrap();
    assert_eq!(vip.role, Role::Vip);
    assert!(ctx.auth.is_unlimited("vip-guest").await.unwrap());
}

#[tokio::test]
async fn resume_restores_a_valid_session() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();
    ctx.auth.login("nora").await.unwrap();

    let resumed = ctx.auth.resume().await.unwrap().unwrap();
    assert_eq!(resumed.username, "nora");
    assert_eq!(resumed.role, Role::Member);
}

#[tokio::test]
async fn resume_tears_down_a_deactivated_session() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();
    ctx.auth.login("nora").await.unwrap();

    // An admin change lands "in another tab".
    ctx.admin.toggle_active("nora").await.unwrap();

    assert!(matches!(
        ctx.auth.resume().await,
        Err(AuthError::AccountInactive)
    ));
    // The session was cleared, not left dangling.
    assert!(ctx.auth.resume().await.unwrap().is_none());
}

#[tokio::test]
async fn resume_tears_down_a_removed_session() {
    let (_dir, ctx) = setup().await;
    ctx.admin.add_user("nora", false, None).await.unwrap();
    ctx.auth.login("nora").await.unwrap();

    let request = ctx.admin.request_delete("nora");
    ctx.admin.confirm_delete(request).await.unwrap();

    assert!(matches!(ctx.auth.resume().await, Err(AuthError::AccessDenied)));
    assert!(ctx.auth.resume().await.unwrap().is_none());
}

#[tokio::test]
async fn logout_clears_the_session() {
    let (_dir, ctx) = setup().await;
    ctx.auth.login("root-admin").await.unwrap();
    ctx.auth.logout().await.unwrap();
    assert!(ctx.auth.resume().await.unwrap().is_none());
}
