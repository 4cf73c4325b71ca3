//! Loads the dashboard panels. Each panel fetches on its own so one failing
//! request only blanks that panel.

use serde::Serialize;
use tracing::warn;

use crate::api::IncidentRepository;
use crate::errors::AppResult;
use crate::incidents::{
    aggregate_totals, group_by_department, most_recent, status_distribution, top_by_impact,
    DashboardTotals, DepartmentImpact, Incident, StatusShare,
};
use crate::telemetry::sanitize_error_copy;

const CHART_LIMIT: usize = 5;
const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum PanelState<T> {
    Ready(T),
    Failed(String),
}

impl<T> PanelState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            PanelState::Ready(value) => Some(value),
            PanelState::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PanelState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardPanels {
    pub stats: PanelState<DashboardTotals>,
    pub department_impact: PanelState<Vec<DepartmentImpact>>,
    pub status_distribution: PanelState<Vec<StatusShare>>,
    pub impact_chart: PanelState<Vec<Incident>>,
    pub recent: PanelState<Vec<Incident>>,
}

pub async fn load_dashboard<R>(repo: &R) -> DashboardPanels
where
    R: IncidentRepository + ?Sized,
{
    let (stats, department_impact, statuses, impact_chart, recent) = tokio::join!(
        panel("stats", repo, |incidents| aggregate_totals(&incidents)),
        panel("department_impact", repo, |incidents| group_by_department(&incidents)),
        panel("status_distribution", repo, |incidents| status_distribution(&incidents)),
        panel("impact_chart", repo, |incidents| top_by_impact(&incidents, CHART_LIMIT)),
        panel("recent", repo, |incidents| most_recent(&incidents, RECENT_LIMIT)),
    );

    DashboardPanels {
        stats,
        department_impact,
        status_distribution: statuses,
        impact_chart,
        recent,
    }
}

async fn panel<R, T, F>(name: &'static str, repo: &R, project: F) -> PanelState<T>
where
    R: IncidentRepository + ?Sized,
    F: FnOnce(Vec<Incident>) -> T,
{
    let fetched: AppResult<Vec<Incident>> = repo.list().await;
    match fetched {
        Ok(incidents) => PanelState::Ready(project(incidents)),
        Err(err) => {
            let message = sanitize_error_copy(&err.to_string());
            warn!(target: "api", panel = name, error = %message, "dashboard panel failed to load");
            PanelState::Failed(message)
        }
    }
}
