//! Typed access to the RCA data API, one repository per record type.

mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::incidents::{
    ActionItem, Department, Equipment, Incident, IncidentDraft, IncidentPatch, Location, User,
};

pub use http::HttpRepository;

/// A record type the data API serves from `{base}/{COLLECTION}`.
pub trait Entity: DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    type Draft: Serialize + Send + Sync;
    type Patch: Serialize + Send + Sync;
}

impl Entity for Incident {
    const COLLECTION: &'static str = "rcas";
    type Draft = IncidentDraft;
    type Patch = IncidentPatch;
}

impl Entity for User {
    const COLLECTION: &'static str = "users";
    type Draft = serde_json::Value;
    type Patch = serde_json::Value;
}

impl Entity for Equipment {
    const COLLECTION: &'static str = "equipment";
    type Draft = serde_json::Value;
    type Patch = serde_json::Value;
}

impl Entity for Location {
    const COLLECTION: &'static str = "locations";
    type Draft = serde_json::Value;
    type Patch = serde_json::Value;
}

impl Entity for Department {
    const COLLECTION: &'static str = "departments";
    type Draft = serde_json::Value;
    type Patch = serde_json::Value;
}

impl Entity for ActionItem {
    const COLLECTION: &'static str = "actions";
    type Draft = serde_json::Value;
    type Patch = serde_json::Value;
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn list(&self) -> AppResult<Vec<T>>;
    async fn get(&self, id: &str) -> AppResult<T>;
    async fn create(&self, draft: &T::Draft) -> AppResult<T>;
    async fn update(&self, id: &str, patch: &T::Patch) -> AppResult<T>;
    async fn delete(&self, id: &str) -> AppResult<()>;
}

/// Server-side summary for the dashboard stats panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(default)]
    pub total_impact: f64,
    #[serde(default)]
    pub total_downtime: f64,
    #[serde(default)]
    pub ongoing_count: usize,
    #[serde(default)]
    pub completed_count: usize,
}

#[async_trait]
pub trait IncidentRepository: Repository<Incident> {
    async fn dashboard_stats(&self) -> AppResult<DashboardStats>;
}

/// Supplies the bearer token attached to every data API request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> AppResult<SecretString>;
}

/// One repository per record type, sharing a client and token source.
#[derive(Clone)]
pub struct ApiClient {
    pub incidents: HttpRepository<Incident>,
    pub users: HttpRepository<User>,
    pub equipment: HttpRepository<Equipment>,
    pub locations: HttpRepository<Location>,
    pub departments: HttpRepository<Department>,
    pub actions: HttpRepository<ActionItem>,
}

impl ApiClient {
    pub fn new(config: &AppConfig, tokens: Arc<dyn TokenSource>) -> AppResult<Self> {
        let base_url = config.data_api_base().ok_or_else(|| {
            AppError::Config("RCA_API_BASE_URL or RCA_CLUSTER/RCA_PROJECT must be set".into())
        })?;
        let http = Client::builder()
            .user_agent("rca-tracker/0.1.0")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self::with_client(http, base_url, tokens))
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            incidents: HttpRepository::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
            users: HttpRepository::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
            equipment: HttpRepository::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
            locations: HttpRepository::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
            departments: HttpRepository::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
            actions: HttpRepository::new(http, base_url, tokens),
        }
    }
}
