//! Emergency dispatch worker
//!
//! Consumes transcript tasks from NATS JetStream, classifies them, finds the
//! nearest responders for each department and publishes the combined result.

mod cli;
mod config;
mod db;
mod defaults;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::jetstream;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::classifier::{create_classifier, Classifier};
use crate::services::consumer::{self, ConsumerSettings, TaskConsumer};
use crate::services::locator::{FacilityLocator, PostgisLocator};
use crate::services::processor::{MessageProcessor, ProcessorConfig};
use crate::services::publisher::{JetStreamPublisher, ResultPublisher};
use crate::types::Task;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    std::fs::create_dir_all(&config.logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,emergency_dispatch_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Submit { transcript, lat, lng, request_id, client_id } => {
            let task = Task {
                transcript,
                lat,
                lng,
                request_id: request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                client_id,
            };
            submit(&config, task).await
        }
        Command::CheckConfig => {
            println!("{}", config);
            Ok(())
        }
    }
}

/// Run the worker until Ctrl-C, restarting the pipeline after broker failures
async fn serve(config: Config) -> Result<()> {
    info!("Starting emergency dispatch worker...");

    if config.ack_wait <= config.task_budget() {
        warn!(
            "ACK_WAIT_SECS ({:?}) does not cover the per-task budget ({:?}); slow tasks may be redelivered",
            config.ack_wait,
            config.task_budget()
        );
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing the task in flight");
            signal.cancel();
        }
    });

    let classifier: Arc<dyn Classifier> = Arc::from(create_classifier(&config)?);
    info!("Classifier initialized: {}", classifier.name());

    let pool = db::create_pool(
        config.database.connect_options()?,
        config.db_max_connections,
        config.lookup_timeout,
    );
    let locator: Arc<dyn FacilityLocator> = Arc::new(PostgisLocator::new(pool));
    info!("Facility locator initialized: {} ({})", locator.name(), config.database);

    while !shutdown.is_cancelled() {
        let result = run_pipeline(&config, &shutdown, Arc::clone(&classifier), Arc::clone(&locator)).await;
        match result {
            Ok(()) => break,
            Err(e) => {
                error!("Worker pipeline failed: {:#}. Restarting in {:?}", e, config.connect_retry);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.connect_retry) => {}
                }
            }
        }
    }

    info!("Worker stopped");
    Ok(())
}

async fn run_pipeline(
    config: &Config,
    shutdown: &CancellationToken,
    classifier: Arc<dyn Classifier>,
    locator: Arc<dyn FacilityLocator>,
) -> Result<()> {
    let Some(client) = consumer::connect_with_retry(config, shutdown).await else {
        return Ok(());
    };
    let mut js = jetstream::new(client);
    js.set_timeout(config.publish_timeout);

    let publisher: Arc<dyn ResultPublisher> =
        Arc::new(JetStreamPublisher::new(js.clone(), config.dead_letter_subject.clone()).await?);

    let processor = Arc::new(MessageProcessor::new(
        classifier,
        locator,
        publisher,
        ProcessorConfig::from(config),
    ));

    TaskConsumer::new(processor, ConsumerSettings::from(config))
        .run(js, shutdown.clone())
        .await
}

async fn submit(config: &Config, task: Task) -> Result<()> {
    task.validate().context("Refusing to enqueue an invalid task")?;

    let client = consumer::connect(config)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;
    let mut js = jetstream::new(client);
    js.set_timeout(config.publish_timeout);

    let sequence = consumer::enqueue_task(&js, &task).await?;
    info!("Task {} enqueued (stream sequence {})", task.request_id, sequence);
    println!("{}", task.request_id);
    Ok(())
}
