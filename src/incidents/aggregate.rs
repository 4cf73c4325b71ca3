use std::collections::HashMap;

use serde::Serialize;

use super::model::{Incident, IncidentStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardTotals {
    pub total_financial_cost: f64,
    pub total_downtime_days: f64,
    pub total_production_loss: f64,
    pub ongoing_count: usize,
    pub completed_count: usize,
    pub critical_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentImpact {
    pub department: String,
    pub financial_cost: f64,
    pub downtime_days: f64,
    pub count: usize,
    /// Width of this department's bar relative to the costliest one, 0..=100.
    pub share_of_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusShare {
    pub status: IncidentStatus,
    pub label: &'static str,
    pub count: usize,
    pub percentage: f64,
}

/// Sums over the full (unfiltered) collection.
pub fn aggregate_totals(incidents: &[Incident]) -> DashboardTotals {
    incidents
        .iter()
        .fold(DashboardTotals::default(), |mut totals, incident| {
            totals.total_financial_cost += incident.impact.financial_cost;
            totals.total_downtime_days += incident.impact.downtime_days;
            totals.total_production_loss += incident.impact.production_loss;
            if incident.status.is_active() {
                totals.ongoing_count += 1;
            } else {
                totals.completed_count += 1;
            }
            if incident.severity().is_critical() {
                totals.critical_count += 1;
            }
            totals
        })
}

pub fn group_by_department(incidents: &[Incident]) -> Vec<DepartmentImpact> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DepartmentImpact> = Vec::new();

    for incident in incidents {
        let department = incident.department_label();
        let slot = *index.entry(department).or_insert_with(|| {
            groups.push(DepartmentImpact {
                department: department.to_string(),
                financial_cost: 0.0,
                downtime_days: 0.0,
                count: 0,
                share_of_max: 0.0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.financial_cost += incident.impact.financial_cost;
        group.downtime_days += incident.impact.downtime_days;
        group.count += 1;
    }

    // Stable: equal costs keep first-seen order.
    groups.sort_by(|a, b| b.financial_cost.total_cmp(&a.financial_cost));

    let max_cost = groups.first().map(|g| g.financial_cost).unwrap_or(0.0);
    if max_cost > 0.0 {
        for group in &mut groups {
            group.share_of_max = group.financial_cost / max_cost * 100.0;
        }
    }
    groups
}

pub fn status_distribution(incidents: &[Incident]) -> Vec<StatusShare> {
    let total = incidents.len();
    IncidentStatus::ALL
        .iter()
        .map(|status| {
            let count = incidents.iter().filter(|i| i.status == *status).count();
            let percentage = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            };
            StatusShare {
                status: *status,
                label: status.label(),
                count,
                percentage,
            }
        })
        .collect()
}

/// The `limit` costliest records, for the impact chart.
pub fn top_by_impact(incidents: &[Incident], limit: usize) -> Vec<Incident> {
    let mut sorted = incidents.to_vec();
    sorted.sort_by(|a, b| {
        b.impact
            .financial_cost
            .total_cmp(&a.impact.financial_cost)
    });
    sorted.truncate(limit);
    sorted
}

/// The `limit` most recently updated records.
pub fn most_recent(incidents: &[Incident], limit: usize) -> Vec<Incident> {
    let mut sorted = incidents.to_vec();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted.truncate(limit);
    sorted
}
