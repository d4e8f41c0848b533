//! CLI argument parsing for the emergency-dispatch-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "emergency-dispatch-worker", about = "Emergency transcript analysis worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Consume and process tasks (default if no subcommand given)
    Serve,
    /// Enqueue a single transcript task, for smoke-testing a deployment
    Submit {
        /// Transcript text to analyse
        #[arg(long)]
        transcript: String,
        /// Caller latitude (WGS84)
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Caller longitude (WGS84)
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Request id; a random UUID when omitted
        #[arg(long)]
        request_id: Option<String>,
        #[arg(long, default_value = "cli")]
        client_id: String,
    },
    /// Print the effective configuration with secrets redacted
    CheckConfig,
}
