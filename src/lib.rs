pub mod api;
pub mod commands;
mod config;
pub mod dashboard;
mod errors;
pub mod identity;
pub mod incidents;
pub mod session;
mod storage;
mod telemetry;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::SessionHealth;
use crate::session::ACCOUNT_KEY;

pub use api::{
    ApiClient, DashboardStats, Entity, HttpRepository, IncidentRepository, Repository, TokenSource,
};
pub use config::{AppConfig, PublicAppConfig};
pub use dashboard::{load_dashboard, DashboardPanels, PanelState};
pub use errors::{AppError, AppResult, ErrorClass};
pub use identity::{
    AccessToken, AccountInfo, ChannelNavigator, IdentityProvider, Navigator, OidcProvider,
};
pub use session::{Session, SessionManager, SessionStatus};
pub use storage::DurableStore;
pub use telemetry::{sanitize_error_copy, TelemetryClient, TelemetryEvent};

const STORE_SERVICE_NAME: &str = "RcaTracker";

/// Everything the host shell needs, wired once at startup.
pub struct AppState {
    config: AppConfig,
    store: DurableStore,
    provider: OidcProvider,
    session: SessionManager,
    api: ApiClient,
    telemetry: TelemetryClient,
}

impl AppState {
    /// Wires the app against the OS keyring.
    pub fn initialize<P: AsRef<Path>>(
        config: AppConfig,
        data_dir: P,
        navigator: Arc<dyn Navigator>,
    ) -> AppResult<Self> {
        Self::with_store(
            config,
            data_dir,
            DurableStore::new(STORE_SERVICE_NAME),
            navigator,
        )
    }

    pub fn with_store<P: AsRef<Path>>(
        config: AppConfig,
        data_dir: P,
        store: DurableStore,
        navigator: Arc<dyn Navigator>,
    ) -> AppResult<Self> {
        init_tracing();
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let telemetry = TelemetryClient::new(data_dir, &config)?;

        let provider = OidcProvider::maybe_new(&config, store.clone(), navigator)?
            .ok_or_else(|| {
                AppError::Config(
                    "RCA_CLIENT_ID, RCA_REDIRECT_URI, RCA_CLUSTER and RCA_TENANT_ID must be set"
                        .into(),
                )
            })?;
        let session = SessionManager::new(
            Arc::new(provider.clone()),
            store.clone(),
            Some(telemetry.clone()),
        );
        let api = ApiClient::new(&config, Arc::new(session.clone()))?;

        if let Err(err) = telemetry.record(
            "app_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "telemetry_enabled": config.telemetry_enabled_by_default,
            }),
        ) {
            warn!(?err, "failed to queue telemetry bootstrap event");
        }
        if let Err(err) = telemetry.flush() {
            warn!(?err, "failed to flush telemetry queue");
        }

        Ok(Self {
            config,
            store,
            provider,
            session,
            api,
            telemetry,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn provider(&self) -> &OidcProvider {
        &self.provider
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn health(&self) -> AppResult<SessionHealth> {
        Ok(SessionHealth {
            telemetry_buffer_path: self.telemetry.buffer_path().to_string_lossy().to_string(),
            telemetry_queue_depth: self.telemetry.queue_depth(),
            has_account_reference: self.store.has(ACCOUNT_KEY)?,
            session: self.session.session(),
            config: self.config.public_profile(),
        })
    }

    pub fn record_telemetry_event(
        &self,
        name: String,
        payload: Value,
        flush: bool,
    ) -> AppResult<()> {
        self.telemetry.record(name, payload)?;
        if flush {
            self.telemetry.flush()?;
        }
        Ok(())
    }
}

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,rca_tracker=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
