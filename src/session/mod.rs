//! Session lifecycle: decides on startup whether the user is signed in and
//! drives login, logout and recovery against an [`IdentityProvider`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::TokenSource;
use crate::errors::{AppError, AppResult};
use crate::identity::{AccountInfo, IdentityProvider};
use crate::storage::DurableStore;
use crate::telemetry::{sanitize_error_copy, TelemetryClient};

/// Durable key holding the signed-in account id. Only this module writes it.
pub const ACCOUNT_KEY: &str = "account";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Authenticating,
    Authenticated,
    Unauthenticated,
    Error(String),
}

impl SessionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub status: SessionStatus,
    pub account: Option<AccountInfo>,
    pub last_error: Option<String>,
}

impl Session {
    fn uninitialized() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            account: None,
            last_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

type Negotiation = Shared<BoxFuture<'static, Session>>;

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: DurableStore,
    telemetry: Option<TelemetryClient>,
    state: watch::Sender<Session>,
    in_flight: Mutex<Option<Negotiation>>,
    login_in_progress: AtomicBool,
    logout_in_progress: AtomicBool,
}

/// Holds an in-progress flag and releases it on drop, including when the
/// owning future is cancelled.
struct OperationGuard<'a>(&'a AtomicBool);

impl<'a> OperationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: DurableStore,
        telemetry: Option<TelemetryClient>,
    ) -> Self {
        let (state, _) = watch::channel(Session::uninitialized());
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                telemetry,
                state,
                in_flight: Mutex::new(None),
                login_in_progress: AtomicBool::new(false),
                logout_in_progress: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Resolves the session. Concurrent callers share a single negotiation;
    /// a settled authenticated or failed session is returned without asking
    /// the provider again.
    pub async fn initialize(&self) -> AppResult<Session> {
        let current = self.session();
        match &current.status {
            SessionStatus::Authenticated => return Ok(current),
            SessionStatus::Error(reason) => return Err(AppError::Authentication(reason.clone())),
            _ => {}
        }

        let negotiation = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fresh = async move { inner.negotiate().await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let session = negotiation.clone().await;
        {
            let mut slot = self.inner.in_flight.lock();
            if slot
                .as_ref()
                .is_some_and(|pending| pending.ptr_eq(&negotiation))
            {
                *slot = None;
            }
        }

        match &session.status {
            SessionStatus::Error(reason) => Err(AppError::Authentication(reason.clone())),
            _ => Ok(session),
        }
    }

    /// Starts an interactive login. Completion arrives through the redirect
    /// and is observed by the next [`SessionManager::initialize`].
    pub async fn login(&self) -> AppResult<()> {
        let Some(_guard) = OperationGuard::acquire(&self.inner.login_in_progress) else {
            debug!(target: "session", "login rejected; another login is running");
            return Err(AppError::LoginInProgress);
        };

        let account = self.session().account;
        self.inner
            .publish(SessionStatus::Authenticating, account, None);
        info!(target: "session", "login started");

        match self.inner.provider.login().await {
            Ok(()) => {
                self.inner.record("login_started", json!({}));
                Ok(())
            }
            Err(err) => {
                let reason = failure_reason(&err);
                warn!(target: "session", error = %reason, "login failed");
                self.inner.publish(
                    SessionStatus::Error(reason.clone()),
                    None,
                    Some(reason.clone()),
                );
                self.inner
                    .record("login_failed", json!({ "error": sanitize_error_copy(&reason) }));
                Err(err)
            }
        }
    }

    /// Signs out locally first; a failing remote sign-out is only logged.
    pub async fn logout(&self) -> AppResult<()> {
        let Some(_guard) = OperationGuard::acquire(&self.inner.logout_in_progress) else {
            debug!(target: "session", "logout already running; ignoring");
            return Ok(());
        };

        let account = self.session().account;
        self.inner.clear_reference();
        self.inner
            .publish(SessionStatus::Unauthenticated, None, None);
        info!(target: "session", "signed out locally");

        if let Err(err) = self.inner.provider.logout(account.as_ref()).await {
            let reason = failure_reason(&err);
            warn!(target: "session", error = %reason, "remote sign-out failed");
            self.inner
                .record("logout_failed", json!({ "error": sanitize_error_copy(&reason) }));
        } else {
            self.inner.record("logout", json!({}));
        }
        Ok(())
    }

    /// Forgets the stored account and cached provider state, then starts over.
    pub async fn retry(&self) -> AppResult<Session> {
        info!(target: "session", "retrying session negotiation");
        self.inner.clear_reference();
        if let Err(err) = self.inner.provider.clear_cache().await {
            warn!(target: "session", ?err, "failed to clear provider cache");
        }
        // A negotiation started before the reset must not answer for it.
        *self.inner.in_flight.lock() = None;
        self.inner
            .publish(SessionStatus::Uninitialized, None, None);
        self.initialize().await
    }

    /// True only when an account is stored and a token can still be obtained
    /// for it without user interaction.
    pub async fn is_authenticated(&self) -> bool {
        let account_id = match self.inner.store.read_string(ACCOUNT_KEY) {
            Ok(Some(id)) => id,
            Ok(None) => return false,
            Err(err) => {
                warn!(target: "session", ?err, "failed to read account reference");
                return false;
            }
        };
        let account = match self.inner.provider.get_account(&account_id).await {
            Ok(Some(account)) => account,
            _ => return false,
        };
        self.inner
            .provider
            .acquire_token_silent(&account)
            .await
            .is_ok()
    }
}

impl Inner {
    async fn negotiate(self: Arc<Self>) -> Session {
        self.publish(SessionStatus::Initializing, None, None);

        let session = match self.resolve_account().await {
            Ok(Some(account)) => {
                info!(target: "session", account = %account.id, "session authenticated");
                self.publish(SessionStatus::Authenticated, Some(account), None)
            }
            Ok(None) => {
                debug!(target: "session", "no usable session; sign-in needed");
                self.publish(SessionStatus::Unauthenticated, None, None)
            }
            Err(err) => {
                let reason = failure_reason(&err);
                warn!(target: "session", error = %reason, "session negotiation failed");
                self.publish(
                    SessionStatus::Error(reason.clone()),
                    None,
                    Some(reason),
                )
            }
        };

        self.record(
            "session_initialized",
            json!({
                "status": session.status.as_str(),
                "error": session.last_error.as_deref().map(sanitize_error_copy),
            }),
        );
        session
    }

    async fn resolve_account(&self) -> AppResult<Option<AccountInfo>> {
        self.provider.initialize().await?;

        match self.provider.handle_redirect().await {
            Ok(Some(account)) if !account.id.is_empty() => {
                self.store.write_string(ACCOUNT_KEY, &account.id)?;
                return Ok(Some(account));
            }
            Ok(_) => {}
            Err(AppError::InteractionRequired) => {
                debug!(target: "session", "redirect reported that interaction is required");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let Some(account_id) = self.store.read_string(ACCOUNT_KEY)? else {
            return Ok(None);
        };
        let Some(account) = self.provider.get_account(&account_id).await? else {
            debug!(target: "session", "stored account is unknown to the provider");
            self.clear_reference();
            return Ok(None);
        };

        match self.provider.acquire_token_silent(&account).await {
            Ok(_) => Ok(Some(account)),
            Err(err) if err.is_interaction_required() => {
                debug!(target: "session", "stored account needs interactive sign-in");
                self.clear_reference();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn publish(
        &self,
        status: SessionStatus,
        account: Option<AccountInfo>,
        last_error: Option<String>,
    ) -> Session {
        let session = Session {
            status,
            account,
            last_error,
        };
        self.state.send_replace(session.clone());
        session
    }

    fn clear_reference(&self) {
        if let Err(err) = self.store.delete(ACCOUNT_KEY) {
            warn!(target: "session", ?err, "failed to clear account reference");
        }
    }

    fn record(&self, name: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record(name, payload) {
                warn!(target: "session", ?err, "failed to queue telemetry event");
            }
        }
    }
}

#[async_trait]
impl TokenSource for SessionManager {
    async fn bearer_token(&self) -> AppResult<SecretString> {
        let Some(account) = self.session().account else {
            return Err(AppError::AuthRequired);
        };

        match self.inner.provider.acquire_token_silent(&account).await {
            Ok(token) => Ok(token.secret),
            Err(err) if err.is_interaction_required() => {
                info!(target: "session", "token refresh needs interaction; signing out");
                self.inner.clear_reference();
                self.inner
                    .publish(SessionStatus::Unauthenticated, None, None);
                Err(AppError::AuthRequired)
            }
            Err(err) => Err(err),
        }
    }
}

fn failure_reason(err: &AppError) -> String {
    match err {
        AppError::Authentication(reason) => reason.clone(),
        other => other.to_string(),
    }
}
