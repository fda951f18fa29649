use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Segment;

/// Current translation state for one (project, target language) unit: the
/// full segment snapshot plus progress flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub project_id: String,
    pub target_language: String,
    pub segments: Vec<Segment>,
    pub is_complete: bool,
    pub updated_at: DateTime<Utc>,
}
