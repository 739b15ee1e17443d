use serde::{Deserialize, Serialize};

/// Links a task to a resource with an allocation in percent (100 = full time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Identifier for the resource. This can be a person id, crew name, or equipment tag.
    pub resource_id: String,
    pub units: u32,
}

impl Assignment {
    pub fn new(resource_id: impl Into<String>, units: u32) -> Self {
        Self {
            resource_id: resource_id.into(),
            units,
        }
    }

    pub fn full_time(resource_id: impl Into<String>) -> Self {
        Self::new(resource_id, 100)
    }
}

/// Sum of allocation units, or `None` when the task has no assignments.
pub fn total_units(assignments: &[Assignment]) -> Option<u64> {
    if assignments.is_empty() {
        return None;
    }
    Some(assignments.iter().map(|a| u64::from(a.units)).sum())
}
