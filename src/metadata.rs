use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub description: String,
    /// Nothing is scheduled before this instant.
    pub project_start: NaiveDateTime,
}

impl ProjectMetadata {
    pub fn new(name: impl Into<String>, project_start: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            project_start,
            ..Self::default()
        }
    }
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        Self {
            name: "New Project".to_string(),
            description: "No description".to_string(),
            project_start: NaiveDate::from_ymd_opt(2025, 1, 1)
                .and_then(|date| date.and_hms_opt(9, 0, 0))
                .unwrap_or_default(),
        }
    }
}
