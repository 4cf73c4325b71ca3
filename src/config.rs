use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 1024 * 1024;
const LOGIN_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cluster: Option<String>,
    pub project: Option<String>,
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub authority: Option<String>,
    pub authorize_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub logout_endpoint: Option<String>,
    pub api_base_url: Option<String>,
    pub http_timeout_secs: u64,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub cluster: Option<String>,
    pub project: Option<String>,
    pub authority: Option<String>,
    pub redirect_uri: Option<String>,
    pub api_base_url: Option<String>,
    pub telemetry_enabled_by_default: bool,
    pub has_client_id: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            cluster: non_empty("RCA_CLUSTER"),
            project: non_empty("RCA_PROJECT"),
            client_id: non_empty("RCA_CLIENT_ID"),
            tenant_id: non_empty("RCA_TENANT_ID"),
            redirect_uri: non_empty("RCA_REDIRECT_URI"),
            post_logout_redirect_uri: non_empty("RCA_POST_LOGOUT_REDIRECT_URI"),
            authority: non_empty("RCA_AUTHORITY"),
            authorize_endpoint: non_empty("RCA_AUTHORIZE_ENDPOINT"),
            token_endpoint: non_empty("RCA_TOKEN_ENDPOINT"),
            logout_endpoint: non_empty("RCA_LOGOUT_ENDPOINT"),
            api_base_url: non_empty("RCA_API_BASE_URL"),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).max(1),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
        }
    }

    /// Base URL of the industrial-data platform, e.g. `https://westeurope-1.cognitedata.com`.
    pub fn platform_base_url(&self) -> Option<String> {
        self.cluster
            .as_ref()
            .map(|cluster| format!("https://{cluster}.cognitedata.com"))
    }

    /// The resource scope that grants access to the data API.
    pub fn resource_scope(&self) -> Option<String> {
        self.platform_base_url()
            .map(|base| format!("{base}/.default"))
    }

    pub fn authority_url(&self) -> Option<String> {
        self.authority
            .clone()
            .or_else(|| {
                self.tenant_id
                    .as_ref()
                    .map(|tenant| format!("{LOGIN_AUTHORITY_HOST}/{tenant}"))
            })
            .map(|authority| authority.trim_end_matches('/').to_string())
    }

    pub fn data_api_base(&self) -> Option<String> {
        if let Some(base) = &self.api_base_url {
            return Some(base.trim_end_matches('/').to_string());
        }
        match (self.platform_base_url(), &self.project) {
            (Some(base), Some(project)) => Some(format!("{base}/api/v1/projects/{project}")),
            _ => None,
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            cluster: self.cluster.clone(),
            project: self.project.clone(),
            authority: self.authority_url(),
            redirect_uri: self.redirect_uri.clone(),
            api_base_url: self.data_api_base(),
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
            has_client_id: self.client_id.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
