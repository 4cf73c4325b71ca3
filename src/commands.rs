//! Entry points for the host shell. Errors cross this boundary as display
//! strings.

use serde::Serialize;

use crate::api::Repository;
use crate::config::PublicAppConfig;
use crate::dashboard::{load_dashboard, DashboardPanels};
use crate::incidents::{project_active, ActiveIncidentsView, FilterCriteria};
use crate::session::Session;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SessionHealth {
    pub telemetry_buffer_path: String,
    pub telemetry_queue_depth: usize,
    pub has_account_reference: bool,
    pub session: Session,
    pub config: PublicAppConfig,
}

pub async fn start_session(state: &AppState) -> Result<Session, String> {
    state.session().initialize().await.map_err(|err| err.to_string())
}

/// Delivers the URL the browser returned to and re-runs session negotiation.
pub async fn complete_redirect(state: &AppState, callback_url: String) -> Result<Session, String> {
    state.provider().deliver_callback(callback_url);
    start_session(state).await
}

pub async fn sign_in(state: &AppState) -> Result<(), String> {
    state.session().login().await.map_err(|err| err.to_string())
}

pub async fn sign_out(state: &AppState) -> Result<(), String> {
    state.session().logout().await.map_err(|err| err.to_string())
}

pub async fn retry_session(state: &AppState) -> Result<Session, String> {
    state.session().retry().await.map_err(|err| err.to_string())
}

pub async fn dashboard(state: &AppState) -> DashboardPanels {
    load_dashboard(&state.api().incidents).await
}

pub async fn active_incidents(
    state: &AppState,
    criteria: FilterCriteria,
) -> Result<ActiveIncidentsView, String> {
    let incidents = state
        .api()
        .incidents
        .list()
        .await
        .map_err(|err| err.to_string())?;
    Ok(project_active(&incidents, &criteria))
}

pub fn session_health(state: &AppState) -> Result<SessionHealth, String> {
    state.health().map_err(|err| err.to_string())
}

pub fn record_telemetry_event(
    state: &AppState,
    name: String,
    payload: serde_json::Value,
    flush: bool,
) -> Result<(), String> {
    state
        .record_telemetry_event(name, payload, flush)
        .map_err(|err| err.to_string())
}
