use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DashboardStats, Entity, IncidentRepository, Repository, TokenSource};
use crate::errors::{AppError, AppResult};
use crate::incidents::Incident;

const MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// REST repository for one collection of the data API.
pub struct HttpRepository<T> {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpRepository<T> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            tokens: Arc::clone(&self.tokens),
            _entity: PhantomData,
        }
    }
}

#[derive(Deserialize)]
struct ListEnvelope<T> {
    items: Vec<T>,
}

impl<T: Entity> HttpRepository<T> {
    pub fn new(http: Client, base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            _entity: PhantomData,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, T::COLLECTION)
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, T::COLLECTION, id)
    }

    async fn send<F>(&self, method: Method, url: &str, build: F) -> AppResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.bearer_token().await?;
        debug!(target: "api", %method, url, "data API request");
        let response = send_with_retry(|| {
            build(
                self.http
                    .request(method.clone(), url)
                    .bearer_auth(token.expose_secret()),
            )
        })
        .await?;
        check_status(response, url).await
    }

    async fn read_json<R: DeserializeOwned>(response: Response) -> AppResult<R> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for HttpRepository<T> {
    async fn list(&self) -> AppResult<Vec<T>> {
        let url = self.collection_url();
        let response = self.send(Method::GET, &url, |req| req).await?;
        let envelope: ListEnvelope<T> = Self::read_json(response).await?;
        Ok(envelope.items)
    }

    async fn get(&self, id: &str) -> AppResult<T> {
        let url = self.item_url(id);
        let response = self.send(Method::GET, &url, |req| req).await?;
        Self::read_json(response).await
    }

    async fn create(&self, draft: &T::Draft) -> AppResult<T> {
        let url = self.collection_url();
        let response = self
            .send(Method::POST, &url, |req| req.json(draft))
            .await?;
        Self::read_json(response).await
    }

    async fn update(&self, id: &str, patch: &T::Patch) -> AppResult<T> {
        let url = self.item_url(id);
        let response = self
            .send(Method::PATCH, &url, |req| req.json(patch))
            .await?;
        Self::read_json(response).await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let url = self.item_url(id);
        self.send(Method::DELETE, &url, |req| req).await?;
        Ok(())
    }
}

#[async_trait]
impl IncidentRepository for HttpRepository<Incident> {
    async fn dashboard_stats(&self) -> AppResult<DashboardStats> {
        let url = format!("{}/stats", self.collection_url());
        let response = self.send(Method::GET, &url, |req| req).await?;
        Self::read_json(response).await
    }
}

async fn send_with_retry<F>(mut build: F) -> AppResult<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let response = build().send().await?;
        let status = response.status();
        if !is_retryable(status) || attempt >= MAX_ATTEMPTS {
            return Ok(response);
        }
        let delay = retry_after(response.headers()).unwrap_or(DEFAULT_RETRY_DELAY);
        let _ = response.bytes().await;
        warn!(target: "api", %status, attempt, delay_ms = delay.as_millis() as u64, "retrying data API request");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn check_status(response: Response, url: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::AuthRequired),
        StatusCode::NOT_FOUND => Err(AppError::NotFound(url.to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::Api {
                status: status.as_u16(),
                message: error_message(&body, status),
            })
        }
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "error")]
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.message)
        .ok()
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

/// `Retry-After` in seconds, or an `x-ratelimit-reset` epoch still in the
/// future.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    };
    if let Some(seconds) = header("retry-after") {
        return Some(Duration::from_secs(seconds));
    }
    let reset = header("x-ratelimit-reset")?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (reset > now).then(|| Duration::from_secs(reset - now))
}
