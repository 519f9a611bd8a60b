//! Runtime configuration.
//!
//! Priority, highest wins:
//!   1. CLI flags / environment variables
//!   2. TOML file at `{data_dir}/config.toml`
//!   3. Built-in defaults
//!
//! The reserved identities, message cap, and trial duration are configuration
//! rather than module constants so tests (and deployments) can vary them.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_SUPER_ADMIN: &str = "admin";
const DEFAULT_VIP_USER: &str = "vip";
const DEFAULT_MESSAGE_CAP: u32 = 10;
const DEFAULT_TRIAL_DAYS: i64 = 7;

// ─── ReservedIdentities ───────────────────────────────────────────────────────

/// The two system identities that exist outside the roster: always permitted,
/// always unlimited, never device-locked.
#[derive(Debug, Clone)]
pub struct ReservedIdentities {
    /// The super-administrator — the only identity the admin surface accepts.
    pub super_admin: String,
    /// The VIP identity — unlimited access, no administrative rights.
    pub vip: String,
}

impl ReservedIdentities {
    pub fn contains(&self, username: &str) -> bool {
        username == self.super_admin || username == self.vip
    }
}

// ─── ProviderConfig ───────────────────────────────────────────────────────────

/// Chat backend configuration (`[provider]` in config.toml).
///
/// The API key is never stored in the file — it is read from the
/// `GEMINI_API_KEY` environment variable when a chat session starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base_url: String,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            system_prompt: "You are a helpful, professional, and intelligent AI assistant. \
                            You answer concisely and accurately."
                .to_string(),
        }
    }
}

// ─── GateConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub data_dir: PathBuf,
    pub log: String,
    pub reserved: ReservedIdentities,
    /// Messages a non-unlimited account may send before being blocked.
    pub message_cap: u32,
    /// Lifetime of a self-registered free-trial account, in days.
    pub trial_days: i64,
    pub provider: ProviderConfig,
}

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    log: Option<String>,
    super_admin: Option<String>,
    vip_user: Option<String>,
    message_cap: Option<u32>,
    trial_days: Option<i64>,
    provider: Option<ProviderConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

impl GateConfig {
    pub fn new(data_dir: Option<PathBuf>, log: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let super_admin = std::env::var("REDGATE_SUPER_ADMIN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.super_admin)
            .unwrap_or_else(|| DEFAULT_SUPER_ADMIN.to_string());

        let vip = std::env::var("REDGATE_VIP_USER")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.vip_user)
            .unwrap_or_else(|| DEFAULT_VIP_USER.to_string());

        let message_cap = toml.message_cap.unwrap_or(DEFAULT_MESSAGE_CAP);
        let trial_days = toml.trial_days.unwrap_or(DEFAULT_TRIAL_DAYS);
        let provider = toml.provider.unwrap_or_default();

        Self {
            data_dir,
            log,
            reserved: ReservedIdentities { super_admin, vip },
            message_cap,
            trial_days,
            provider,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/redgate
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("redgate");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/redgate or ~/.local/share/redgate
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("redgate");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("redgate");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("redgate");
        }
    }
    PathBuf::from(".redgate")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
