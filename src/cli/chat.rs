//! `redgate chat` — terminal chat over the streaming backend.
//!
//! Interactive REPL by default, or a single prompt with `--prompt`. The
//! quota gate runs before every send; once the limit is reached the input
//! loop is replaced by a blocking notice.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::chat::{ChatClient, ChatError, TurnOutcome};
use crate::provider::GeminiProvider;
use crate::quota::Subject;
use crate::AppContext;

pub async fn run(ctx: &AppContext, one_shot: Option<String>) -> Result<()> {
    let session = super::require_session(ctx).await?;
    let subject = Subject {
        username: session.username.clone(),
        unlimited: ctx.auth.is_unlimited(&session.username).await?,
    };

    let api_key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY is not set — the chat backend needs an API key")?;
    let provider = Arc::new(GeminiProvider::new(&ctx.config.provider, api_key));
    let mut client = ChatClient::new(
        provider,
        ctx.quota.clone(),
        subject,
        &session,
        &ctx.config.provider.system_prompt,
    );

    if let Some(prompt) = one_shot {
        return send_one(ctx, &mut client, &prompt).await;
    }

    println!("{}", session.welcome);
    print_allowance(ctx, &client).await?;
    println!("Type a message, /clear to reset the conversation, /quit to exit.\n");

    loop {
        if client.is_limit_reached().await? {
            println!(
                "\nMessage limit reached — all {} messages used for '{}'.",
                ctx.quota.cap(),
                client.subject().username
            );
            break;
        }

        print!("you> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                client.clear();
                println!("Conversation cleared.\n");
                continue;
            }
            _ => send_one(ctx, &mut client, input).await?,
        }
    }

    Ok(())
}

async fn send_one(ctx: &AppContext, client: &mut ChatClient, prompt: &str) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.red} {msg}")
            .unwrap(),
    );
    spinner.set_message("Thinking…");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let mut started = false;
    let outcome = client
        .send_turn(prompt, &mut |fragment| {
            if !started {
                spinner.finish_and_clear();
                started = true;
            }
            print!("{fragment}");
            std::io::stdout().flush().ok();
        })
        .await;
    if !started {
        spinner.finish_and_clear();
    }

    match outcome {
        Ok(TurnOutcome::Completed) => {
            println!("\n");
        }
        Ok(TurnOutcome::Failed(e)) => {
            // The transcript already carries the synthetic notice.
            if started {
                println!();
            }
            eprintln!("error: {e}");
            if let Some(notice) = client.transcript().last() {
                println!("{}\n", notice.content);
            }
        }
        Err(ChatError::LimitReached(cap)) => {
            println!(
                "Message limit reached — all {cap} messages used for '{}'.",
                client.subject().username
            );
            return Ok(());
        }
        Err(ChatError::Storage(e)) => return Err(e),
    }

    print_allowance(ctx, client).await
}

async fn print_allowance(ctx: &AppContext, client: &ChatClient) -> Result<()> {
    match client.remaining().await? {
        None => println!("[unlimited access]"),
        Some(left) => println!("[{left}/{} messages remaining]", ctx.quota.cap()),
    }
    Ok(())
}
