//! Configuration management

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};
use sqlx::postgres::PgConnectOptions;

use crate::defaults::*;

/// Which classifier implementation the worker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    Gemini,
    Mock,
}

impl FromStr for ClassifierBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            other => anyhow::bail!("CLASSIFIER_BACKEND must be 'gemini' or 'mock', got '{}'", other),
        }
    }
}

/// Postgres connection settings, either a full URL or individual parts
#[derive(Clone)]
pub enum DatabaseConfig {
    Url(String),
    Parts {
        host: String,
        port: u16,
        name: String,
        user: String,
        password: String,
    },
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match self {
            DatabaseConfig::Url(url) => url
                .parse::<PgConnectOptions>()
                .context("DATABASE_URL is not a valid Postgres URL"),
            DatabaseConfig::Parts { host, port, name, user, password } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(name)
                .username(user)
                .password(password)),
        }
    }
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(_) => write!(f, "DATABASE_URL (redacted)"),
            DatabaseConfig::Parts { host, port, name, user, .. } => {
                write!(f, "postgres://{}:***@{}:{}/{}", user, host, port, name)
            }
        }
    }
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS user and password
    pub nats_credentials: Option<(String, String)>,

    pub database: DatabaseConfig,
    pub db_max_connections: u32,

    /// Facility search radius in meters
    pub lookup_radius_meters: f64,

    /// Echo the task's clientId in published results
    pub include_client_id: bool,

    pub classifier_backend: ClassifierBackend,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,

    pub classify_timeout: Duration,
    pub lookup_timeout: Duration,
    pub publish_attempts: u32,
    pub publish_retry_delay: Duration,
    /// How long one publish waits for the stream's ack
    pub publish_timeout: Duration,

    /// Delay between broker connection attempts
    pub connect_retry: Duration,
    pub ack_wait: Duration,
    pub max_deliver: i64,

    /// Subject that receives tasks dropped without a result
    pub dead_letter_subject: Option<String>,

    pub logs_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let nats_url = var("NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.to_string());
        let nats_credentials = match (var("NATS_USER"), var("NATS_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        };

        let database = match var("DATABASE_URL") {
            Some(url) => DatabaseConfig::Url(url),
            None => DatabaseConfig::Parts {
                host: var("DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
                port: parse_or(&var, "DB_PORT", DEFAULT_DB_PORT)?,
                name: var("DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
                user: var("DB_USER").unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
                password: var("DB_PASSWORD").unwrap_or_else(|| DEFAULT_DB_PASSWORD.to_string()),
            },
        };
        let db_max_connections = parse_or(&var, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;

        let lookup_radius_meters = parse_or(&var, "LOOKUP_RADIUS_METERS", DEFAULT_LOOKUP_RADIUS_METERS)?;
        if !lookup_radius_meters.is_finite() || lookup_radius_meters <= 0.0 {
            anyhow::bail!("LOOKUP_RADIUS_METERS must be a positive number, got {}", lookup_radius_meters);
        }

        let include_client_id = parse_or(&var, "INCLUDE_CLIENT_ID", true)?;

        let classifier_backend = match var("CLASSIFIER_BACKEND") {
            Some(raw) => raw.parse()?,
            None => ClassifierBackend::Gemini,
        };
        let google_api_key = var("GOOGLE_API_KEY");
        if classifier_backend == ClassifierBackend::Gemini && google_api_key.is_none() {
            anyhow::bail!("GOOGLE_API_KEY must be set when CLASSIFIER_BACKEND is 'gemini'");
        }

        let publish_attempts = parse_or(&var, "PUBLISH_ATTEMPTS", DEFAULT_PUBLISH_ATTEMPTS)?;
        if publish_attempts == 0 {
            anyhow::bail!("PUBLISH_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            nats_url,
            nats_credentials,
            database,
            db_max_connections,
            lookup_radius_meters,
            include_client_id,
            classifier_backend,
            google_api_key,
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            classify_timeout: Duration::from_secs(parse_or(&var, "CLASSIFY_TIMEOUT_SECS", DEFAULT_CLASSIFY_TIMEOUT_SECS)?),
            lookup_timeout: Duration::from_secs(parse_or(&var, "LOOKUP_TIMEOUT_SECS", DEFAULT_LOOKUP_TIMEOUT_SECS)?),
            publish_attempts,
            publish_retry_delay: Duration::from_millis(parse_or(&var, "PUBLISH_RETRY_DELAY_MS", DEFAULT_PUBLISH_RETRY_DELAY_MS)?),
            publish_timeout: Duration::from_secs(parse_or(&var, "PUBLISH_TIMEOUT_SECS", DEFAULT_PUBLISH_TIMEOUT_SECS)?),
            connect_retry: Duration::from_secs(parse_or(&var, "CONNECT_RETRY_SECS", DEFAULT_CONNECT_RETRY_SECS)?),
            ack_wait: Duration::from_secs(parse_or(&var, "ACK_WAIT_SECS", DEFAULT_ACK_WAIT_SECS)?),
            max_deliver: parse_or(&var, "MAX_DELIVER", DEFAULT_MAX_DELIVER)?,
            dead_letter_subject: var("DEAD_LETTER_SUBJECT"),
            logs_dir: var("LOGS_DIR").unwrap_or_else(|| "./logs".to_string()),
        })
    }

    /// Worst-case wall time spent on one task before it is acked
    pub fn task_budget(&self) -> Duration {
        let mut publish = self.publish_timeout * self.publish_attempts;
        for attempt in 1..self.publish_attempts {
            publish += self.publish_retry_delay * 2u32.saturating_pow(attempt - 1);
        }
        if self.dead_letter_subject.is_some() {
            publish += self.publish_timeout;
        }
        self.classify_timeout + self.lookup_timeout + publish
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nats_url            = {}", self.nats_url)?;
        writeln!(f, "nats_auth           = {}", if self.nats_credentials.is_some() { "user/password" } else { "none" })?;
        writeln!(f, "database            = {}", self.database)?;
        writeln!(f, "db_max_connections  = {}", self.db_max_connections)?;
        writeln!(f, "lookup_radius_m     = {}", self.lookup_radius_meters)?;
        writeln!(f, "include_client_id   = {}", self.include_client_id)?;
        writeln!(f, "classifier          = {:?} ({})", self.classifier_backend, self.gemini_model)?;
        writeln!(f, "google_api_key      = {}", if self.google_api_key.is_some() { "set" } else { "unset" })?;
        writeln!(f, "classify_timeout    = {:?}", self.classify_timeout)?;
        writeln!(f, "lookup_timeout      = {:?}", self.lookup_timeout)?;
        writeln!(f, "publish_attempts    = {} (base delay {:?})", self.publish_attempts, self.publish_retry_delay)?;
        writeln!(f, "publish_timeout     = {:?}", self.publish_timeout)?;
        writeln!(f, "connect_retry       = {:?}", self.connect_retry)?;
        writeln!(f, "ack_wait            = {:?}", self.ack_wait)?;
        writeln!(f, "max_deliver         = {}", self.max_deliver)?;
        writeln!(f, "dead_letter_subject = {}", self.dead_letter_subject.as_deref().unwrap_or("-"))?;
        write!(f, "logs_dir            = {}", self.logs_dir)
    }
}
