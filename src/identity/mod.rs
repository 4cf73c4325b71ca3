//! The seam between the session state machine and the identity provider.

mod oidc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub use oidc::OidcProvider;

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Opaque, stable account id; this is what gets persisted.
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: SecretString,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-time setup; repeated calls are no-ops.
    async fn initialize(&self) -> AppResult<()>;

    /// Consumes the inbound redirect callback, if any, and returns the account
    /// it signed in.
    async fn handle_redirect(&self) -> AppResult<Option<AccountInfo>>;

    async fn get_account(&self, account_id: &str) -> AppResult<Option<AccountInfo>>;

    /// Non-interactive token acquisition. Fails with
    /// [`AppError::InteractionRequired`] when only a fresh login can help.
    async fn acquire_token_silent(&self, account: &AccountInfo) -> AppResult<AccessToken>;

    /// Starts the redirect login; control returns through `handle_redirect`.
    async fn login(&self) -> AppResult<()>;

    async fn logout(&self, account: Option<&AccountInfo>) -> AppResult<()>;

    /// Drops every cached token and any half-finished login.
    async fn clear_cache(&self) -> AppResult<()>;
}

/// Performs the browser redirect the provider protocol asks for.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str) -> AppResult<()>;
}

/// Hands redirect targets to the host shell over a channel.
pub struct ChannelNavigator {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, url: &str) -> AppResult<()> {
        debug!(target: "identity", "navigating to identity provider");
        self.sender
            .send(url.to_string())
            .map_err(|_| AppError::Authentication("navigation target is gone".into()))
    }
}
