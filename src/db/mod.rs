//! Database module

pub mod facility;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

/// Create a database connection pool.
///
/// The pool connects lazily so the worker can start, and keep consuming,
/// while the database is unreachable; lookups then fail individually.
pub fn create_pool(options: PgConnectOptions, max_connections: u32, acquire_timeout: Duration) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_lazy_with(options)
}
