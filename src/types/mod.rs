//! Type definitions

pub mod classification;
pub mod facility;
pub mod result;
pub mod task;

pub use classification::*;
pub use facility::*;
pub use result::*;
pub use task::*;

use serde::{Deserialize, Serialize};

/// WGS84 point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}
