//! Task queue consumer
//!
//! Pulls transcript tasks from JetStream one at a time and acknowledges every
//! delivery once it has been handled, whatever the outcome. Only a crash
//! before the ack leads to redelivery.
//!
//! ## Streams
//! - `TRANSCRIPT_PROCESSING` - inbound tasks (subject `transcript_processing_queue`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream::{self, consumer::PullConsumer, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::defaults::{TASK_CONSUMER, TASK_QUEUE, TASK_STREAM};
use crate::services::processor::{MessageProcessor, Outcome};
use crate::types::Task;

/// What happened to one delivery; every variant is acknowledged
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Processed(Outcome),
    /// Payload could not be decoded into a valid task
    Malformed,
    /// Processing panicked; caught by the safety net
    Panicked,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub ack_wait: Duration,
    pub max_deliver: i64,
    /// Pause before re-opening the message stream after it ends
    pub resubscribe_delay: Duration,
}

impl From<&Config> for ConsumerSettings {
    fn from(config: &Config) -> Self {
        Self {
            ack_wait: config.ack_wait,
            max_deliver: config.max_deliver,
            resubscribe_delay: config.connect_retry,
        }
    }
}

/// Connect to NATS once, with credentials when configured
pub async fn connect(config: &Config) -> Result<Client, async_nats::ConnectError> {
    match &config.nats_credentials {
        Some((user, password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone())
                .connect(&config.nats_url)
                .await
        }
        None => async_nats::connect(&config.nats_url).await,
    }
}

/// Connect to NATS, retrying with a fixed delay until it succeeds.
///
/// Returns `None` only if shutdown is requested while waiting.
pub async fn connect_with_retry(config: &Config, shutdown: &CancellationToken) -> Option<Client> {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match connect(config).await {
            Ok(client) => {
                info!("Connected to NATS at {}", config.nats_url);
                return Some(client);
            }
            Err(e) => {
                warn!(
                    "Failed to connect to NATS at {} (attempt {}): {}. Retrying in {:?}",
                    config.nats_url, attempt, e, config.connect_retry
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(config.connect_retry) => {}
                }
            }
        }
    }
}

/// Declare the durable task stream
pub async fn ensure_task_stream(js: &JsContext) -> Result<jetstream::stream::Stream> {
    let stream_config = jetstream::stream::Config {
        name: TASK_STREAM.to_string(),
        subjects: vec![TASK_QUEUE.to_string()],
        retention: jetstream::stream::RetentionPolicy::WorkQueue,
        storage: jetstream::stream::StorageType::File,
        ..Default::default()
    };
    let stream = js.get_or_create_stream(stream_config).await?;
    info!("JetStream task stream '{}' ready", TASK_STREAM);
    Ok(stream)
}

/// Enqueue a task the same way the upstream producer does
pub async fn enqueue_task(js: &JsContext, task: &Task) -> Result<u64> {
    ensure_task_stream(js).await?;
    let payload = serde_json::to_vec(task)?;
    let ack = js.publish(TASK_QUEUE, payload.into()).await?.await?;
    Ok(ack.sequence)
}

/// Decode and process one message body
pub async fn handle_payload(processor: &Arc<MessageProcessor>, payload: &[u8]) -> Delivery {
    let task = match Task::from_slice(payload) {
        Ok(task) => task,
        Err(e) => {
            warn!("Discarding malformed task ({}): {}", e, preview(payload));
            return Delivery::Malformed;
        }
    };

    let request_id = task.request_id.clone();
    let processor = Arc::clone(processor);

    // Spawned so a panic is contained to this task and surfaces as a JoinError
    match tokio::spawn(async move { processor.process(&task).await }).await {
        Ok(outcome) => Delivery::Processed(outcome),
        Err(e) => {
            error!("Unexpected failure while processing request {}: {}", request_id, e);
            Delivery::Panicked
        }
    }
}

fn preview(payload: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(payload);
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

/// Sequential consume-process-ack loop over the task queue
pub struct TaskConsumer {
    processor: Arc<MessageProcessor>,
    settings: ConsumerSettings,
}

impl TaskConsumer {
    pub fn new(processor: Arc<MessageProcessor>, settings: ConsumerSettings) -> Self {
        Self { processor, settings }
    }

    async fn consumer(&self, js: &JsContext) -> Result<PullConsumer> {
        let stream = ensure_task_stream(js).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(TASK_CONSUMER.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.settings.ack_wait,
            max_deliver: self.settings.max_deliver,
            filter_subject: TASK_QUEUE.to_string(),
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(TASK_CONSUMER, consumer_config).await?;
        info!("JetStream task consumer '{}' ready", TASK_CONSUMER);
        Ok(consumer)
    }

    /// Consume until `shutdown` fires. The message in flight is always
    /// finished and acknowledged before returning.
    pub async fn run(&self, js: JsContext, shutdown: CancellationToken) -> Result<()> {
        let consumer = self.consumer(&js).await?;

        while !shutdown.is_cancelled() {
            // One message per pull: nothing sits prefetched while another replica is idle
            let mut messages = consumer.stream().max_messages_per_batch(1).messages().await?;
            info!("Waiting for tasks on '{}'", TASK_QUEUE);

            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = messages.next() => next,
                };

                match next {
                    Some(Ok(msg)) => self.handle_message(msg).await,
                    Some(Err(e)) => error!("Error receiving task message: {}", e),
                    None => {
                        warn!("Task message stream ended, re-subscribing in {:?}", self.settings.resubscribe_delay);
                        tokio::time::sleep(self.settings.resubscribe_delay).await;
                        break;
                    }
                }
            }
        }

        info!("Task consumer stopped");
        Ok(())
    }

    async fn handle_message(&self, msg: jetstream::Message) {
        let delivered = msg.info().map(|i| i.delivered).unwrap_or(0);
        if delivered > 1 {
            warn!("Task message delivered {} times (previous worker likely crashed)", delivered);
        }

        let delivery = handle_payload(&self.processor, &msg.payload).await;
        match &delivery {
            Delivery::Processed(Outcome::Published { .. }) => {}
            Delivery::Processed(outcome) => warn!("Task finished without a result: {:?}", outcome),
            Delivery::Malformed => warn!("Acknowledging malformed task"),
            Delivery::Panicked => error!("Acknowledging task after unexpected failure"),
        }

        // Never requeue: a task that failed here would fail again
        if let Err(e) = msg.ack().await {
            error!("Failed to ack task message: {:?}", e);
        }
    }
}
