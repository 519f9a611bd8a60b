pub mod admin;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod identity;
pub mod provider;
pub mod quota;
pub mod roster;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use admin::AdminSurface;
use auth::AuthEngine;
use config::GateConfig;
use quota::QuotaTracker;
use roster::RosterStore;
use storage::Storage;

/// Shared state handed to every CLI command.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<GateConfig>,
    pub storage: Storage,
    pub roster: RosterStore,
    pub auth: Arc<AuthEngine>,
    pub quota: QuotaTracker,
    pub admin: Arc<AdminSurface>,
    /// Stable identifier for this device, minted on first run.
    pub device_id: String,
}

impl AppContext {
    pub async fn init(config: GateConfig) -> Result<Self> {
        let storage = Storage::new(&config.data_dir).await?;
        let device_id = identity::get_or_create(&storage).await?;

        let roster = RosterStore::new(storage.clone());
        let auth = AuthEngine::new(
            storage.clone(),
            roster.clone(),
            config.reserved.clone(),
            config.trial_days,
            device_id.clone(),
        );
        let quota = QuotaTracker::new(storage.clone(), config.message_cap);
        let admin = AdminSurface::new(roster.clone(), config.reserved.clone());

        Ok(Self {
            config: Arc::new(config),
            storage,
            roster,
            auth: Arc::new(auth),
            quota,
            admin: Arc::new(admin),
            device_id,
        })
    }
}
