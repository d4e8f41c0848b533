//! Facility lookup abstraction
//!
//! Every lookup goes through the department allow-list before any data
//! source is touched. `PostgisLocator` is the production backend; tests use
//! the in-memory locator at the bottom of this file.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::db;
use crate::types::{Coordinates, Department, Facility, UnknownDepartment};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    UnknownDepartment(#[from] UnknownDepartment),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("lookup timed out")]
    Timeout,
}

/// Nearest-facility search, one dataset per [`Department`]
#[async_trait]
pub trait FacilityLocator: Send + Sync {
    /// Closest facility of `category` within `radius_meters` of `center`.
    ///
    /// `Ok(None)` means nothing inside the radius. A `category` outside the
    /// allow-list is rejected with [`LookupError::UnknownDepartment`].
    async fn nearest(
        &self,
        center: Coordinates,
        radius_meters: f64,
        category: &str,
    ) -> Result<Option<Facility>, LookupError>;

    fn name(&self) -> &'static str;
}

/// PostGIS-backed locator
pub struct PostgisLocator {
    pool: PgPool,
}

impl PostgisLocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FacilityLocator for PostgisLocator {
    async fn nearest(
        &self,
        center: Coordinates,
        radius_meters: f64,
        category: &str,
    ) -> Result<Option<Facility>, LookupError> {
        let department: Department = category.parse()?;

        // Connection goes back to the pool when `conn` drops, on every path
        let mut conn = self.pool.acquire().await?;
        let facility = db::facility::find_nearest(&mut conn, department, center, radius_meters).await?;

        Ok(facility)
    }

    fn name(&self) -> &'static str {
        "postgis"
    }
}

#[cfg(test)]
pub use memory::InMemoryLocator;
