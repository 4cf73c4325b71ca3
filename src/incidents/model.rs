use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const UNSPECIFIED_LOCATION: &str = "Unspecified";
pub const UNKNOWN_DEPARTMENT: &str = "Unknown Department";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentStatus {
    Draft,
    InProgress,
    Review,
    Completed,
    Archived,
}

impl IncidentStatus {
    /// Display order used by the status distribution panel.
    pub const ALL: [IncidentStatus; 5] = [
        IncidentStatus::Draft,
        IncidentStatus::InProgress,
        IncidentStatus::Review,
        IncidentStatus::Completed,
        IncidentStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Draft => "draft",
            IncidentStatus::InProgress => "in-progress",
            IncidentStatus::Review => "review",
            IncidentStatus::Completed => "completed",
            IncidentStatus::Archived => "archived",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IncidentStatus::Draft => "Draft",
            IncidentStatus::InProgress => "In Progress",
            IncidentStatus::Review => "Under Review",
            IncidentStatus::Completed => "Completed",
            IncidentStatus::Archived => "Archived",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Draft | IncidentStatus::InProgress | IncidentStatus::Review
        )
    }
}

/// Severity as delivered by the data API.
///
/// Anything outside `1..=5` is kept as `Unknown` with its raw value so a bad
/// record still renders. Values that are not integers at all read as
/// `Unknown(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "i64")]
pub enum Severity {
    Low,
    Minor,
    Moderate,
    Major,
    Critical,
    Unknown(i64),
}

impl Severity {
    pub fn level(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Minor => 2,
            Severity::Moderate => 3,
            Severity::Major => 4,
            Severity::Critical => 5,
            Severity::Unknown(raw) => *raw,
        }
    }

    /// Ordering key for "most severe first"; unknown values sink to the bottom.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Unknown(_) => 0,
            known => known.level() as u8,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Minor => "Minor",
            Severity::Moderate => "Moderate",
            Severity::Major => "Major",
            Severity::Critical => "Critical",
            Severity::Unknown(_) => "Unknown",
        }
    }

    pub fn is_critical(&self) -> bool {
        self.rank() >= 4
    }
}

impl From<i64> for Severity {
    fn from(value: i64) -> Self {
        match value {
            1 => Severity::Low,
            2 => Severity::Minor,
            3 => Severity::Moderate,
            4 => Severity::Major,
            5 => Severity::Critical,
            other => Severity::Unknown(other),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Unknown(0)
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let level = raw.as_i64().or_else(|| {
            raw.as_f64()
                .filter(|value| value.fract() == 0.0 && value.abs() <= i64::MAX as f64)
                .map(|value| value as i64)
        });
        Ok(level.map(Severity::from).unwrap_or_default())
    }
}

impl From<Severity> for i64 {
    fn from(value: Severity) -> Self {
        value.level()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    #[serde(default)]
    pub financial_cost: f64,
    #[serde(default)]
    pub downtime_days: f64,
    #[serde(default)]
    pub production_loss: f64,
    #[serde(default)]
    pub severity_level: Severity,
}

/// A root-cause-analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub impact: Impact,
    #[serde(default)]
    pub department_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub assigned_to_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_investigator_id: Option<String>,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl Incident {
    /// Location used for grouping and filtering; blank counts as missing.
    pub fn location_label(&self) -> &str {
        self.location_id
            .as_deref()
            .filter(|location| !location.is_empty())
            .unwrap_or(UNSPECIFIED_LOCATION)
    }

    pub fn department_label(&self) -> &str {
        if self.department_id.is_empty() {
            UNKNOWN_DEPARTMENT
        } else {
            &self.department_id
        }
    }

    pub fn severity(&self) -> Severity {
        self.impact.severity_level
    }
}

/// Payload for a new record, as captured by the "new RCA" form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentDraft {
    pub title: String,
    pub description: String,
    pub department_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_investigator_id: Option<String>,
    pub financial_cost: f64,
    pub downtime_days: f64,
    pub production_loss: f64,
    pub severity_level: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub department: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentStatus {
    Operational,
    Maintenance,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub department: String,
    pub status: EquipmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_maintenance_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    pub code: String,
    pub building: String,
    pub floor: String,
    pub department: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub code: String,
    pub manager: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_department: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub id: String,
    pub rca_id: String,
    pub description: String,
    pub assigned_to_id: String,
    pub due_date: DateTime<Utc>,
    pub status: ActionStatus,
    pub priority: u8,
    #[serde(default)]
    pub comments: Vec<String>,
}
