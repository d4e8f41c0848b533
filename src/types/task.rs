//! Inbound transcript task

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Coordinates;

/// Why an inbound message cannot be turned into a [`Task`]
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("payload is not valid task JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a valid coordinate: {value}")]
    InvalidCoordinate { field: &'static str, value: f64 },
}

/// Task as it arrives on the wire; every field is optional until validated
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    transcript: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    request_id: Option<String>,
    client_id: Option<String>,
}

/// A validated transcript-analysis task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub transcript: String,
    pub lat: f64,
    pub lng: f64,
    pub request_id: String,
    pub client_id: String,
}

impl Task {
    /// Decode and validate a message body
    pub fn from_slice(payload: &[u8]) -> Result<Self, TaskError> {
        let raw: RawTask = serde_json::from_slice(payload)?;
        raw.validate()
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lng: self.lng,
        }
    }

    /// Re-check the invariants a decoded task must satisfy
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.transcript.trim().is_empty() {
            return Err(TaskError::MissingField("transcript"));
        }
        if self.request_id.trim().is_empty() {
            return Err(TaskError::MissingField("requestId"));
        }
        if self.client_id.trim().is_empty() {
            return Err(TaskError::MissingField("clientId"));
        }
        check_coordinate("lat", self.lat, 90.0)?;
        check_coordinate("lng", self.lng, 180.0)?;
        Ok(())
    }
}

impl RawTask {
    fn validate(self) -> Result<Task, TaskError> {
        let task = Task {
            transcript: non_empty(self.transcript, "transcript")?,
            lat: self.lat.ok_or(TaskError::MissingField("lat"))?,
            lng: self.lng.ok_or(TaskError::MissingField("lng"))?,
            request_id: non_empty(self.request_id, "requestId")?,
            client_id: non_empty(self.client_id, "clientId")?,
        };
        task.validate()?;
        Ok(task)
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, TaskError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(TaskError::MissingField(field)),
    }
}

fn check_coordinate(field: &'static str, value: f64, bound: f64) -> Result<(), TaskError> {
    if value.is_finite() && value.abs() <= bound {
        Ok(())
    } else {
        Err(TaskError::InvalidCoordinate { field, value })
    }
}
