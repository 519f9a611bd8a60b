//! `redgate login` / `register` / `logout` / `whoami`.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::auth::Session;
use crate::quota::Subject;
use crate::AppContext;

pub async fn login(ctx: &AppContext, username: &str) -> Result<()> {
    let session = ctx.auth.login(username.trim()).await?;
    println!("{}", session.welcome);
    print_allowance(ctx, &session).await
}

pub async fn register(ctx: &AppContext, username: &str) -> Result<()> {
    let session = ctx.auth.register_trial(username.trim()).await?;
    println!(
        "Free trial registered — {} days, {} messages.",
        ctx.config.trial_days, ctx.config.message_cap
    );
    println!("{}", session.welcome);
    print_allowance(ctx, &session).await
}

pub async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.auth.logout().await?;
    println!("Logged out.");
    Ok(())
}

pub async fn whoami(ctx: &AppContext) -> Result<()> {
    let session = super::require_session(ctx).await?;
    println!("Identity: {} ({:?})", session.username, session.role);

    if let Some(user) = ctx.roster.find(&session.username).await? {
        match user.expiry_date {
            Some(ts) => println!("Expires:  {}", format_date(ts)),
            None => println!("Expires:  never (permanent)"),
        }
        println!(
            "Device:   {}",
            if user.device_id.is_some() { "linked" } else { "unlinked" }
        );
    }

    print_allowance(ctx, &session).await
}

async fn print_allowance(ctx: &AppContext, session: &Session) -> Result<()> {
    let subject = Subject {
        username: session.username.clone(),
        unlimited: ctx.auth.is_unlimited(&session.username).await?,
    };
    match ctx.quota.remaining(&subject).await? {
        None => println!("Messages: unlimited"),
        Some(left) => println!("Messages: {left}/{} remaining", ctx.quota.cap()),
    }
    Ok(())
}

pub(crate) fn format_date(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => epoch_ms.to_string(),
    }
}
