use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::model::Incident;

pub const ALL_LOCATIONS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Date,
    Severity,
    Impact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeverityFilter {
    #[default]
    All,
    Level(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocationFilter {
    #[default]
    All,
    Named(String),
}

impl LocationFilter {
    /// Maps a dropdown value back to a filter; `"all"` and blank mean no filter.
    pub fn parse(value: &str) -> Self {
        if value.is_empty() || value == ALL_LOCATIONS {
            LocationFilter::All
        } else {
            LocationFilter::Named(value.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterCriteria {
    pub severity: SeverityFilter,
    pub location: LocationFilter,
    pub sort_by: SortBy,
}

/// What the active-incidents page renders.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveIncidentsView {
    pub incidents: Vec<Incident>,
    pub locations: Vec<String>,
}

/// Keeps draft, in-progress and review records.
pub fn filter_active(incidents: &[Incident]) -> Vec<Incident> {
    incidents
        .iter()
        .filter(|incident| incident.status.is_active())
        .cloned()
        .collect()
}

/// Location dropdown options for the active subset: `"all"` first, then the
/// distinct labels in lexicographic order.
pub fn unique_locations(incidents: &[Incident]) -> Vec<String> {
    let distinct: BTreeSet<&str> = incidents
        .iter()
        .filter(|incident| incident.status.is_active())
        .map(Incident::location_label)
        .collect();

    std::iter::once(ALL_LOCATIONS.to_string())
        .chain(distinct.into_iter().map(str::to_string))
        .collect()
}

pub fn apply_filters(incidents: &[Incident], criteria: &FilterCriteria) -> Vec<Incident> {
    incidents
        .iter()
        .filter(|incident| match criteria.severity {
            SeverityFilter::All => true,
            SeverityFilter::Level(level) => incident.severity().level() == level,
        })
        .filter(|incident| match &criteria.location {
            LocationFilter::All => true,
            LocationFilter::Named(location) => incident.location_label() == location,
        })
        .cloned()
        .collect()
}

/// Sorts most-recent / most-severe / most-costly first. `sort_by` is stable,
/// so records sharing a key keep their incoming order.
pub fn sort_incidents(incidents: &mut [Incident], sort_by: SortBy) {
    match sort_by {
        SortBy::Date => incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortBy::Severity => incidents.sort_by(|a, b| b.severity().rank().cmp(&a.severity().rank())),
        SortBy::Impact => incidents.sort_by(|a, b| {
            b.impact
                .financial_cost
                .total_cmp(&a.impact.financial_cost)
        }),
    }
}

pub fn project_active(incidents: &[Incident], criteria: &FilterCriteria) -> ActiveIncidentsView {
    let active = filter_active(incidents);
    let mut filtered = apply_filters(&active, criteria);
    sort_incidents(&mut filtered, criteria.sort_by);
    ActiveIncidentsView {
        incidents: filtered,
        locations: unique_locations(&active),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidents::model::IncidentStatus;
    use crate::incidents::test_support::incident;

    fn sample() -> Vec<Incident> {
        vec![
            incident("1", IncidentStatus::Draft, 3, 1000.0, Some("Site A"), "2023-01-15T10:00:00Z"),
            incident("2", IncidentStatus::InProgress, 5, 5000.0, Some("Site B"), "2023-01-10T10:00:00Z"),
            incident("3", IncidentStatus::Review, 1, 100.0, None, "2023-01-20T10:00:00Z"),
            incident("4", IncidentStatus::Completed, 2, 500.0, Some("Site A"), "2023-01-05T10:00:00Z"),
            incident("5", IncidentStatus::InProgress, 3, 1500.0, Some("Site B"), "2023-01-18T10:00:00Z"),
            incident("6", IncidentStatus::Draft, 5, 6000.0, Some("Site C"), "2023-01-12T10:00:00Z"),
        ]
    }

    fn ids(incidents: &[Incident]) -> Vec<&str> {
        incidents.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn default_projection_sorts_active_by_date() {
        let view = project_active(&sample(), &FilterCriteria::default());
        assert_eq!(ids(&view.incidents), vec!["3", "5", "1", "6", "2"]);
        assert_eq!(
            view.locations,
            vec!["all", "Site A", "Site B", "Site C", "Unspecified"]
        );
    }

    #[test]
    fn active_and_closed_partition_the_collection() {
        let all = sample();
        let active = filter_active(&all);
        let closed: Vec<&Incident> = all
            .iter()
            .filter(|i| matches!(i.status, IncidentStatus::Completed | IncidentStatus::Archived))
            .collect();

        assert_eq!(active.len() + closed.len(), all.len());
        for item in &all {
            let in_active = active.iter().any(|a| a.id == item.id);
            let in_closed = closed.iter().any(|c| c.id == item.id);
            assert!(in_active ^ in_closed, "{} must land in exactly one side", item.id);
        }
    }

    #[test]
    fn severity_filter_is_exact_match() {
        let active = filter_active(&sample());
        let criteria = FilterCriteria {
            severity: SeverityFilter::Level(5),
            ..FilterCriteria::default()
        };
        let mut filtered = apply_filters(&active, &criteria);
        sort_incidents(&mut filtered, SortBy::Date);
        assert_eq!(ids(&filtered), vec!["6", "2"]);
    }

    #[test]
    fn location_filter_matches_unspecified_and_combines_with_severity() {
        let all = sample();
        let unspecified = project_active(
            &all,
            &FilterCriteria {
                location: LocationFilter::parse("Unspecified"),
                ..FilterCriteria::default()
            },
        );
        assert_eq!(ids(&unspecified.incidents), vec!["3"]);

        let combined = project_active(
            &all,
            &FilterCriteria {
                severity: SeverityFilter::Level(3),
                location: LocationFilter::parse("Site B"),
                sort_by: SortBy::Date,
            },
        );
        assert_eq!(ids(&combined.incidents), vec!["5"]);
    }

    #[test]
    fn sorts_by_impact_descending() {
        let mut active = filter_active(&sample());
        sort_incidents(&mut active, SortBy::Impact);
        assert_eq!(ids(&active), vec!["6", "2", "5", "1", "3"]);
    }

    #[test]
    fn severity_sort_is_stable_for_shared_keys() {
        let mut active = filter_active(&sample());
        sort_incidents(&mut active, SortBy::Severity);
        let levels: Vec<i64> = active.iter().map(|i| i.severity().level()).collect();
        assert_eq!(levels, vec![5, 5, 3, 3, 1]);
        // 2 precedes 6 and 1 precedes 5 in the input.
        assert_eq!(ids(&active), vec!["2", "6", "1", "5", "3"]);
    }

    #[test]
    fn impact_and_date_sorts_keep_input_order_on_ties() {
        let mut tied = vec![
            incident("a", IncidentStatus::Draft, 2, 700.0, None, "2023-02-01T00:00:00Z"),
            incident("b", IncidentStatus::Draft, 4, 700.0, None, "2023-02-01T00:00:00Z"),
            incident("c", IncidentStatus::Draft, 1, 900.0, None, "2023-01-01T00:00:00Z"),
        ];
        sort_incidents(&mut tied, SortBy::Impact);
        assert_eq!(ids(&tied), vec!["c", "a", "b"]);
        sort_incidents(&mut tied, SortBy::Date);
        assert_eq!(ids(&tied), vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_severity_sorts_last() {
        let mut items = vec![
            incident("x", IncidentStatus::Draft, 42, 0.0, None, "2023-01-01T00:00:00Z"),
            incident("y", IncidentStatus::Draft, 1, 0.0, None, "2023-01-01T00:00:00Z"),
        ];
        sort_incidents(&mut items, SortBy::Severity);
        assert_eq!(ids(&items), vec!["y", "x"]);
    }

    #[test]
    fn locations_have_no_duplicates_and_one_unspecified() {
        let mut all = sample();
        all.push(incident("7", IncidentStatus::Review, 2, 0.0, Some(""), "2023-01-01T00:00:00Z"));
        all.push(incident("8", IncidentStatus::Draft, 2, 0.0, None, "2023-01-01T00:00:00Z"));
        let locations = unique_locations(&all);

        assert_eq!(locations[0], ALL_LOCATIONS);
        let unspecified = locations.iter().filter(|l| *l == "Unspecified").count();
        assert_eq!(unspecified, 1);
        let distinct: BTreeSet<&String> = locations.iter().collect();
        assert_eq!(distinct.len(), locations.len());
    }

    #[test]
    fn empty_collection_yields_only_the_all_sentinel() {
        let view = project_active(&[], &FilterCriteria::default());
        assert!(view.incidents.is_empty());
        assert_eq!(view.locations, vec!["all"]);
    }
}
