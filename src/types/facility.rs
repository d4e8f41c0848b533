//! Responder facility types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Nearest responder location for one department
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub distance_meters: f64,
    pub lat: f64,
    pub lng: f64,
}
