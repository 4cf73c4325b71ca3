//! Incident records and the pure view-model logic the dashboard panels use.

pub mod aggregate;
pub mod format;
pub mod model;
pub mod view;

pub use aggregate::{
    aggregate_totals, group_by_department, most_recent, status_distribution, top_by_impact,
    DashboardTotals, DepartmentImpact, StatusShare,
};
pub use model::{
    ActionItem, ActionStatus, Department, Equipment, EquipmentStatus, Impact, Incident,
    IncidentDraft, IncidentPatch, IncidentStatus, Location, Severity, User,
    UNKNOWN_DEPARTMENT, UNSPECIFIED_LOCATION,
};
pub use view::{
    apply_filters, filter_active, project_active, sort_incidents, unique_locations,
    ActiveIncidentsView, FilterCriteria, LocationFilter, SeverityFilter, SortBy, ALL_LOCATIONS,
};
