//! Nearest-facility queries against the per-department PostGIS tables
//!
//! Each department table carries at least `id`, `name` and a
//! `location geography(Point, 4326)` column. `name` is nullable and comes back
//! as an empty string.

use sqlx::PgConnection;

use crate::types::{Coordinates, Department, Facility};

macro_rules! nearest_query {
    ($table:literal) => {
        concat!(
            r#"
            SELECT
                id::text AS id,
                COALESCE(name, '') AS name,
                ST_Distance(location, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography) AS distance_meters,
                ST_Y(location::geometry) AS lat,
                ST_X(location::geometry) AS lng
            FROM "#,
            $table,
            r#"
            WHERE ST_DWithin(location, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, $3)
            ORDER BY distance_meters
            LIMIT 1
            "#
        )
    };
}

const NEAREST_POLICE: &str = nearest_query!("police");
const NEAREST_FIREBRIGADE: &str = nearest_query!("firebrigade");
const NEAREST_HOSPITAL: &str = nearest_query!("hospital");

/// Static SQL for a department; table names never come from input
pub fn nearest_sql(department: Department) -> &'static str {
    match department {
        Department::Police => NEAREST_POLICE,
        Department::FireBrigade => NEAREST_FIREBRIGADE,
        Department::Hospital => NEAREST_HOSPITAL,
    }
}

/// Find the closest facility of `department` within `radius_meters` of `center`
pub async fn find_nearest(
    conn: &mut PgConnection,
    department: Department,
    center: Coordinates,
    radius_meters: f64,
) -> Result<Option<Facility>, sqlx::Error> {
    // PostGIS points are (lng, lat)
    sqlx::query_as::<_, Facility>(nearest_sql(department))
        .bind(center.lng)
        .bind(center.lat)
        .bind(radius_meters)
        .fetch_optional(conn)
        .await
}
