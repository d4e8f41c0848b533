//! Outbound result and dead-letter messages

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClassificationResult, Facility, Task};

pub const STATUS_COMPLETED: &str = "completed";

/// Combined analysis published to the results queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub transcript_analysis: ClassificationResult,
    /// Only departments with a facility inside the radius appear here
    pub closest_nearby_services: BTreeMap<String, Facility>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl ResultPayload {
    pub fn completed(
        task: &Task,
        include_client_id: bool,
        analysis: ClassificationResult,
        services: BTreeMap<String, Facility>,
    ) -> Self {
        Self {
            request_id: task.request_id.clone(),
            client_id: include_client_id.then(|| task.client_id.clone()),
            transcript_analysis: analysis,
            closest_nearby_services: services,
            status: STATUS_COMPLETED.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Pipeline stage at which a task was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStage {
    Classification,
    Publish,
}

/// A task the worker acknowledged without delivering a result
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub task: Task,
    pub stage: DropStage,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(task: &Task, stage: DropStage, reason: impl Into<String>) -> Self {
        Self {
            task: task.clone(),
            stage,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
