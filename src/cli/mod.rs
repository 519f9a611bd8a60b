//! CLI command implementations. Each submodule backs one `redgate`
//! subcommand; shared session plumbing lives here.

pub mod admin;
pub mod auth;
pub mod chat;

use anyhow::{Context as _, Result};

use crate::auth::{Role, Session};
use crate::AppContext;

/// Resumes the stored session, surfacing the invalidation reason if an
/// administrative change (deactivation, expiry, removal) has landed since.
pub(crate) async fn require_session(ctx: &AppContext) -> Result<Session> {
    ctx.auth
        .resume()
        .await
        .map_err(|e| anyhow::anyhow!("session is no longer valid: {e}"))?
        .context("not logged in — run `redgate login <username>` first")
}

/// Admin commands are only reachable by the reserved super-administrator.
pub(crate) async fn require_admin(ctx: &AppContext) -> Result<Session> {
    let session = require_session(ctx).await?;
    anyhow::ensure!(
        session.role == Role::SuperAdmin,
        "'{}' is not the super-administrator",
        session.username
    );
    Ok(session)
}
