//! `redgate admin …` — roster administration commands.

use anyhow::Result;
use clap::Subcommand;
use std::io::Write as _;

use crate::admin::{PlanFilter, RosterQuery, SortKey, StatusFilter};
use crate::cli::auth::format_date;
use crate::roster::AuthUser;
use crate::AppContext;

#[derive(Debug, Subcommand)]
pub enum AdminAction {
    /// Add a roster entry (active, unclaimed, non-trial).
    Add {
        username: String,
        /// Exempt the account from the message quota.
        #[arg(long)]
        unlimited: bool,
        /// Expire the account this many days out (omit for permanent).
        #[arg(long)]
        days: Option<u32>,
    },
    /// Update an entry's plan — only the unlimited flag and expiry change.
    Update {
        username: String,
        #[arg(long)]
        unlimited: bool,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Flip an entry's active flag.
    Toggle { username: String },
    /// Clear an entry's device lock so the next login can re-bind it.
    Unlink { username: String },
    /// Delete an entry. Asks for confirmation first.
    Delete {
        username: String,
        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// List roster entries.
    List {
        /// Case-insensitive substring match on the username.
        #[arg(long)]
        search: Option<String>,
        /// all | active | inactive
        #[arg(long, default_value = "all")]
        status: String,
        /// all | free | paid
        #[arg(long, default_value = "all")]
        plan: String,
        /// newest | oldest | username | expiry
        #[arg(long, default_value = "newest")]
        sort: String,
    },
}

pub async fn run(ctx: &AppContext, action: AdminAction) -> Result<()> {
    super::require_admin(ctx).await?;

    match action {
        AdminAction::Add {
            username,
            unlimited,
            days,
        } => {
            let user = ctx.admin.add_user(username.trim(), unlimited, days).await?;
            println!("Added '{}' ({}).", user.username, plan_label(&user));
            Ok(())
        }
        AdminAction::Update {
            username,
            unlimited,
            days,
        } => {
            let user = ctx.admin.update_user(username.trim(), unlimited, days).await?;
            println!("Updated '{}' ({}).", user.username, plan_label(&user));
            Ok(())
        }
        AdminAction::Toggle { username } => {
            let active = ctx.admin.toggle_active(username.trim()).await?;
            println!(
                "'{}' is now {}.",
                username.trim(),
                if active { "active" } else { "inactive" }
            );
            Ok(())
        }
        AdminAction::Unlink { username } => {
            ctx.admin.unlink_device(username.trim()).await?;
            println!("Unlinked '{}' — next login re-binds it.", username.trim());
            Ok(())
        }
        AdminAction::Delete { username, yes } => {
            let request = ctx.admin.request_delete(username.trim());
            if !yes && !confirm_delete(request.username())? {
                println!("Aborted.");
                return Ok(());
            }
            ctx.admin.confirm_delete(request).await?;
            println!("Deleted '{}'.", username.trim());
            Ok(())
        }
        AdminAction::List {
            search,
            status,
            plan,
            sort,
        } => {
            let query = RosterQuery {
                search,
                status: parse_status(&status)?,
                plan: parse_plan(&plan)?,
                sort: parse_sort(&sort)?,
            };
            list(ctx, &query).await
        }
    }
}

fn confirm_delete(username: &str) -> Result<bool> {
    print!("Delete '{username}' permanently? This cannot be undone. [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn list(ctx: &AppContext, query: &RosterQuery) -> Result<()> {
    let users = ctx.admin.list(query).await?;
    if users.is_empty() {
        println!("No roster entries match.");
        return Ok(());
    }

    for user in &users {
        let expiry = user
            .expiry_date
            .map(format_date)
            .unwrap_or_else(|| "permanent".to_string());
        let device = if user.device_id.is_some() { "linked" } else { "-" };
        let sent = ctx.quota.count(&user.username).await?;
        println!(
            "{:<20} {:<8} {:<10} exp:{:<11} dev:{:<7} sent:{}",
            user.username,
            if user.is_active { "active" } else { "inactive" },
            plan_label(user),
            expiry,
            device,
            sent,
        );
    }
    println!("{} entr{}.", users.len(), if users.len() == 1 { "y" } else { "ies" });
    Ok(())
}

fn plan_label(user: &AuthUser) -> &'static str {
    if user.is_unlimited {
        "unlimited"
    } else if user.free_trial() {
        "free"
    } else {
        "standard"
    }
}

fn parse_status(raw: &str) -> Result<StatusFilter> {
    match raw {
        "all" => Ok(StatusFilter::All),
        "active" => Ok(StatusFilter::Active),
        "inactive" => Ok(StatusFilter::Inactive),
        other => anyhow::bail!("unknown status filter '{other}' (all|active|inactive)"),
    }
}

fn parse_plan(raw: &str) -> Result<PlanFilter> {
    match raw {
        "all" => Ok(PlanFilter::All),
        "free" => Ok(PlanFilter::Free),
        "paid" => Ok(PlanFilter::Paid),
        other => anyhow::bail!("unknown plan filter '{other}' (all|free|paid)"),
    }
}

fn parse_sort(raw: &str) -> Result<SortKey> {
    match raw {
        "newest" => Ok(SortKey::NewestFirst),
        "oldest" => Ok(SortKey::OldestFirst),
        "username" => Ok(SortKey::Username),
        "expiry" => Ok(SortKey::ExpiryAscending),
        other => anyhow::bail!("unknown sort key '{other}' (newest|oldest|username|expiry)"),
    }
}
