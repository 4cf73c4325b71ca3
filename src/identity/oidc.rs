use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{AccessToken, AccountInfo, IdentityProvider, Navigator};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::storage::DurableStore;

const TOKEN_CACHE_KEY: &str = "token-cache";
const PENDING_AUTH_KEY: &str = "pending-auth";
const OIDC_SCOPES: &str = "openid profile offline_access";
const PENDING_AUTH_TTL_MINUTES: i64 = 10;
const EXPIRY_BUFFER_MINUTES: i64 = 5;
const MAX_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

// OAuth error codes that only an interactive sign-in can resolve.
const INTERACTION_ERRORS: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "login_required",
    "consent_required",
];

/// Authorization-code + PKCE public client that signs in by redirecting.
#[derive(Clone)]
pub struct OidcProvider {
    http: Client,
    settings: OidcSettings,
    store: DurableStore,
    navigator: Arc<dyn Navigator>,
    pending_callback: Arc<Mutex<Option<String>>>,
    initialized: Arc<AtomicBool>,
}

#[derive(Clone)]
struct OidcSettings {
    client_id: String,
    authorize_endpoint: String,
    token_endpoint: String,
    logout_endpoint: String,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    scopes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingAuth {
    state: String,
    code_verifier: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    account: AccountInfo,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    scope: Option<String>,
}

impl CachedToken {
    fn is_expiring(&self) -> bool {
        Utc::now() + Duration::minutes(EXPIRY_BUFFER_MINUTES) >= self.expires_at
    }

    fn to_access_token(&self) -> AccessToken {
        AccessToken {
            secret: SecretString::new(self.access_token.clone().into()),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenCache {
    #[serde(default)]
    entries: HashMap<String, CachedToken>,
}

impl OidcProvider {
    /// Returns `None` when the client id, authority or redirect URI are not
    /// configured.
    pub fn maybe_new(
        config: &AppConfig,
        store: DurableStore,
        navigator: Arc<dyn Navigator>,
    ) -> AppResult<Option<Self>> {
        let authority = config.authority_url();
        let endpoint = |explicit: &Option<String>, suffix: &str| {
            explicit.clone().or_else(|| {
                authority
                    .as_ref()
                    .map(|authority| format!("{authority}/oauth2/v2.0/{suffix}"))
            })
        };

        let (
            Some(client_id),
            Some(redirect_uri),
            Some(resource_scope),
            Some(authorize_endpoint),
            Some(token_endpoint),
            Some(logout_endpoint),
        ) = (
            config.client_id.clone(),
            config.redirect_uri.clone(),
            config.resource_scope(),
            endpoint(&config.authorize_endpoint, "authorize"),
            endpoint(&config.token_endpoint, "token"),
            endpoint(&config.logout_endpoint, "logout"),
        )
        else {
            return Ok(None);
        };

        let http = Client::builder()
            .user_agent("rca-tracker/0.1.0")
            .timeout(StdDuration::from_secs(config.http_timeout_secs))
            .build()?;

        Ok(Some(Self {
            http,
            settings: OidcSettings {
                client_id,
                authorize_endpoint,
                token_endpoint,
                logout_endpoint,
                post_logout_redirect_uri: config
                    .post_logout_redirect_uri
                    .clone()
                    .unwrap_or_else(|| redirect_uri.clone()),
                redirect_uri,
                scopes: format!("{resource_scope} {OIDC_SCOPES}"),
            },
            store,
            navigator,
            pending_callback: Arc::new(Mutex::new(None)),
            initialized: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Hands over the URL the browser landed on after returning from the
    /// identity provider. It is consumed by the next `handle_redirect`.
    pub fn deliver_callback(&self, url: impl Into<String>) {
        *self.pending_callback.lock() = Some(url.into());
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<TokenSuccessResponse> {
        self.token_request(&[
            ("client_id", self.settings.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
            ("scope", self.settings.scopes.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenSuccessResponse> {
        self.token_request(&[
            ("client_id", self.settings.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", self.settings.scopes.as_str()),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> AppResult<TokenSuccessResponse> {
        let response = self
            .http
            .post(&self.settings.token_endpoint)
            .form(form)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        let err: TokenErrorResponse = response.json().await.unwrap_or(TokenErrorResponse {
            error: "unknown_error".into(),
            error_description: None,
        });
        if INTERACTION_ERRORS.contains(&err.error.as_str()) {
            debug!(target: "identity", error = %err.error, "token request needs interaction");
            return Err(AppError::InteractionRequired);
        }
        let detail = err
            .error_description
            .map(|d| format!(": {d}"))
            .unwrap_or_default();
        Err(AppError::Authentication(format!(
            "token request failed ({status}): {}{detail}",
            err.error
        )))
    }

    fn load_cache(&self) -> AppResult<TokenCache> {
        match self.store.read(TOKEN_CACHE_KEY)? {
            Some(raw) => match serde_json::from_str(raw.expose_secret()) {
                Ok(cache) => Ok(cache),
                Err(err) => {
                    warn!(target: "identity", ?err, "discarding unreadable token cache");
                    Ok(TokenCache::default())
                }
            },
            None => Ok(TokenCache::default()),
        }
    }

    fn save_cache(&self, cache: &TokenCache) -> AppResult<()> {
        let payload = serde_json::to_string(cache)?;
        self.store
            .write(TOKEN_CACHE_KEY, &SecretString::new(payload.into()))
    }

    fn cache_token(
        &self,
        account: &AccountInfo,
        success: TokenSuccessResponse,
        fallback_refresh: Option<String>,
    ) -> AppResult<CachedToken> {
        let cached = CachedToken {
            account: account.clone(),
            access_token: success.access_token,
            refresh_token: success.refresh_token.or(fallback_refresh),
            expires_at: Utc::now() + token_lifetime(success.expires_in),
            scope: success.scope,
        };
        let mut cache = self.load_cache()?;
        cache.entries.insert(account.id.clone(), cached.clone());
        self.save_cache(&cache)?;
        Ok(cached)
    }

    fn take_pending_auth(&self) -> AppResult<Option<PendingAuth>> {
        let pending = self
            .store
            .read(PENDING_AUTH_KEY)?
            .map(|raw| serde_json::from_str::<PendingAuth>(raw.expose_secret()))
            .transpose()?;
        self.store.delete(PENDING_AUTH_KEY)?;
        Ok(pending)
    }

    /// Finishes the sign-in this client started. A callback with no pending
    /// sign-in (a reload, or a code delivered twice) is ignored.
    async fn complete_sign_in(
        &self,
        code: &str,
        state: Option<&str>,
    ) -> AppResult<Option<AccountInfo>> {
        let Some(pending) = self.take_pending_auth()? else {
            debug!(target: "identity", "ignoring callback with no sign-in in progress");
            return Ok(None);
        };
        if Utc::now() > pending.expires_at {
            return Err(AppError::Authentication(
                "sign-in expired; start it again".into(),
            ));
        }
        if state != Some(pending.state.as_str()) {
            return Err(AppError::Authentication(
                "sign-in failed state verification".into(),
            ));
        }

        let response = self.exchange_code(code, &pending.code_verifier).await?;
        let account = account_from_id_token(response.id_token.as_deref())?;
        self.cache_token(&account, response, None)?;
        info!(target: "identity", account = %account.id, "redirect sign-in completed");
        Ok(Some(account))
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn initialize(&self) -> AppResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        for endpoint in [
            &self.settings.authorize_endpoint,
            &self.settings.token_endpoint,
            &self.settings.logout_endpoint,
            &self.settings.redirect_uri,
        ] {
            Url::parse(endpoint)
                .map_err(|err| AppError::Config(format!("invalid URL {endpoint}: {err}")))?;
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_redirect(&self) -> AppResult<Option<AccountInfo>> {
        let Some(raw) = self.pending_callback.lock().take() else {
            return Ok(None);
        };
        let params = callback_params(&raw)?;

        match (params.get("code"), params.get("error")) {
            (_, Some(error)) => {
                self.store.delete(PENDING_AUTH_KEY)?;
                if INTERACTION_ERRORS.contains(&error.as_str()) {
                    return Err(AppError::InteractionRequired);
                }
                let detail = params
                    .get("error_description")
                    .map(|d| format!(": {d}"))
                    .unwrap_or_default();
                Err(AppError::Authentication(format!("sign-in failed ({error}){detail}")))
            }
            (Some(code), None) => {
                self.complete_sign_in(code, params.get("state").map(String::as_str))
                    .await
            }
            (None, None) => Ok(None),
        }
    }

    async fn get_account(&self, account_id: &str) -> AppResult<Option<AccountInfo>> {
        Ok(self
            .load_cache()?
            .entries
            .get(account_id)
            .map(|entry| entry.account.clone()))
    }

    async fn acquire_token_silent(&self, account: &AccountInfo) -> AppResult<AccessToken> {
        let cache = self.load_cache()?;
        let Some(entry) = cache.entries.get(&account.id) else {
            return Err(AppError::InteractionRequired);
        };
        if !entry.is_expiring() {
            return Ok(entry.to_access_token());
        }
        let Some(refresh_token) = entry.refresh_token.clone() else {
            return Err(AppError::InteractionRequired);
        };

        let response = self.refresh(&refresh_token).await?;
        let refreshed = self.cache_token(&entry.account, response, Some(refresh_token))?;
        debug!(target: "identity", account = %account.id, "refreshed access token");
        Ok(refreshed.to_access_token())
    }

    async fn login(&self) -> AppResult<()> {
        let state = random_token(24);
        let code_verifier = random_verifier(64);
        let code_challenge = build_code_challenge(&code_verifier)?;
        let pending = PendingAuth {
            state: state.clone(),
            code_verifier,
            expires_at: Utc::now() + Duration::minutes(PENDING_AUTH_TTL_MINUTES),
        };
        self.store.write(
            PENDING_AUTH_KEY,
            &SecretString::new(serde_json::to_string(&pending)?.into()),
        )?;

        let mut auth_url = Url::parse(&self.settings.authorize_endpoint)
            .map_err(|err| AppError::Config(format!("invalid authorize endpoint: {err}")))?;
        auth_url
            .query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scopes)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        info!(target: "identity", "starting redirect sign-in");
        self.navigator.navigate(auth_url.as_str())
    }

    async fn logout(&self, account: Option<&AccountInfo>) -> AppResult<()> {
        let mut logout_url = Url::parse(&self.settings.logout_endpoint)
            .map_err(|err| AppError::Config(format!("invalid logout endpoint: {err}")))?;
        {
            let mut query = logout_url.query_pairs_mut();
            query.append_pair(
                "post_logout_redirect_uri",
                &self.settings.post_logout_redirect_uri,
            );
            if let Some(hint) = account.and_then(|a| a.username.as_deref()) {
                query.append_pair("logout_hint", hint);
            }
        }

        if let Some(account) = account {
            let mut cache = self.load_cache()?;
            if cache.entries.remove(&account.id).is_some() {
                self.save_cache(&cache)?;
            }
        }

        info!(target: "identity", "starting redirect sign-out");
        self.navigator.navigate(logout_url.as_str())
    }

    async fn clear_cache(&self) -> AppResult<()> {
        *self.pending_callback.lock() = None;
        self.store.delete(TOKEN_CACHE_KEY)?;
        self.store.delete(PENDING_AUTH_KEY)?;
        Ok(())
    }
}

/// Reads the callback parameters from the query string, falling back to the
/// fragment for `response_mode=fragment` redirects.
fn callback_params(raw: &str) -> AppResult<HashMap<String, String>> {
    let url = Url::parse(raw)
        .map_err(|err| AppError::Authentication(format!("failed to parse redirect: {err}")))?;
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if !params.contains_key("code") && !params.contains_key("error") {
        if let Some(fragment) = url.fragment() {
            let as_query = Url::parse(&format!("http://fragment.invalid/?{fragment}"))
                .map_err(|err| AppError::Authentication(format!("failed to parse redirect: {err}")))?;
            params.extend(as_query.query_pairs().into_owned());
        }
    }
    Ok(params)
}

fn account_from_id_token(id_token: Option<&str>) -> AppResult<AccountInfo> {
    let token = id_token
        .ok_or_else(|| AppError::Authentication("token response missing id_token".into()))?;
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AppError::Authentication("malformed id_token".into()))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AppError::Authentication(format!("malformed id_token: {err}")))?;
    let claims: IdTokenClaims = serde_json::from_slice(&decoded)?;
    let id = claims
        .oid
        .or(claims.sub)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Authentication("id_token has no subject".into()))?;

    Ok(AccountInfo {
        id,
        username: claims.preferred_username,
        name: claims.name,
    })
}

/// Lifetime from `expires_in`, capped at one day.
fn token_lifetime(expires_in: u64) -> Duration {
    let seconds = i64::try_from(expires_in)
        .unwrap_or(MAX_TOKEN_LIFETIME_SECS)
        .min(MAX_TOKEN_LIFETIME_SECS);
    Duration::seconds(seconds)
}

fn random_token(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_verifier(len: usize) -> String {
    let mut rng = thread_rng();
    let extras = ['-', '_', '.', '~'];
    (0..len)
        .map(|_| {
            if rng.gen_bool(0.2) {
                extras[rng.gen_range(0..extras.len())]
            } else {
                rng.sample(Alphanumeric) as char
            }
        })
        .collect()
}

fn build_code_challenge(verifier: &str) -> AppResult<String> {
    if verifier.is_empty() {
        return Err(AppError::Config("missing code verifier".into()));
    }
    let digest = Sha256::digest(verifier.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

#[derive(Deserialize)]
struct TokenSuccessResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}
