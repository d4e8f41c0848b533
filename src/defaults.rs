//! Defaults shared by configuration, the consumer and the CLI

/// Queue the producer enqueues transcript tasks on
pub const TASK_QUEUE: &str = "transcript_processing_queue";
pub const TASK_STREAM: &str = "TRANSCRIPT_PROCESSING";
pub const TASK_CONSUMER: &str = "transcript_workers";

/// Queue the downstream notifier consumes results from
pub const RESULTS_QUEUE: &str = "processing_results_queue";
pub const RESULTS_STREAM: &str = "PROCESSING_RESULTS";

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "db123";
pub const DEFAULT_DB_USER: &str = "user123";
pub const DEFAULT_DB_PASSWORD: &str = "password123";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_LOOKUP_RADIUS_METERS: f64 = 5_000.0;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_CLASSIFY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;
pub const DEFAULT_PUBLISH_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONNECT_RETRY_SECS: u64 = 5;
pub const DEFAULT_ACK_WAIT_SECS: u64 = 120;
pub const DEFAULT_MAX_DELIVER: i64 = 5;
