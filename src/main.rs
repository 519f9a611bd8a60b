use anyhow::Result;
use clap::{Parser, Subcommand};

use redgate::{cli, config::GateConfig, AppContext};

#[derive(Parser)]
#[command(
    name = "redgate",
    about = "Access-gated AI chat terminal — local roster, device locks, and message quotas",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the roster, device identity, and counters
    #[arg(long, env = "REDGATE_DATA_DIR", global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REDGATE_LOG", global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in as a roster or reserved identity.
    ///
    /// The first successful login of an unclaimed account binds it to this
    /// device; later logins from other devices are rejected.
    Login { username: String },
    /// Register a free-trial account and log in (one per device).
    Register { username: String },
    /// Clear the stored session identity.
    Logout,
    /// Show the current session identity and remaining allowance.
    Whoami,
    /// Chat with the streaming AI backend.
    ///
    /// Interactive by default; `/clear` resets the conversation, `/quit`
    /// exits. Requires GEMINI_API_KEY in the environment.
    Chat {
        /// Single-shot prompt — print the reply and exit.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Roster administration (super-administrator only).
    Admin {
        #[command(subcommand)]
        action: cli::admin::AdminAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GateConfig::new(args.data_dir, args.log);

    tracing_subscriber::fmt()
        .with_env_filter(config.log.as_str())
        .compact()
        .init();

    let ctx = AppContext::init(config).await?;

    match args.command {
        Command::Login { username } => cli::auth::login(&ctx, &username).await,
        Command::Register { username } => cli::auth::register(&ctx, &username).await,
        Command::Logout => cli::auth::logout(&ctx).await,
        Command::Whoami => cli::auth::whoami(&ctx).await,
        Command::Chat { prompt } => cli::chat::run(&ctx, prompt).await,
        Command::Admin { action } => cli::admin::run(&ctx, action).await,
    }
}
