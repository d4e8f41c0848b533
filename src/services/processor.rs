//! Per-task orchestration: classify, look up responders, publish
//!
//! `MessageProcessor::process` never fails. Every error is turned into an
//! [`Outcome`] and the caller acknowledges the message regardless; nothing
//! here is retried by redelivery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::services::classifier::{Classifier, ClassifyError};
use crate::services::locator::{FacilityLocator, LookupError};
use crate::services::publisher::{PublishError, ResultPublisher};
use crate::types::{ClassificationResult, DeadLetter, DropStage, Facility, ResultPayload, Task};

/// Tunables shared by every task a processor handles
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub radius_meters: f64,
    pub include_client_id: bool,
    pub classify_timeout: Duration,
    pub lookup_timeout: Duration,
    pub publish_attempts: u32,
    pub publish_retry_delay: Duration,
}

impl From<&Config> for ProcessorConfig {
    fn from(config: &Config) -> Self {
        Self {
            radius_meters: config.lookup_radius_meters,
            include_client_id: config.include_client_id,
            classify_timeout: config.classify_timeout,
            lookup_timeout: config.lookup_timeout,
            publish_attempts: config.publish_attempts,
            publish_retry_delay: config.publish_retry_delay,
        }
    }
}

/// How processing of one task ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Result published with this many departments resolved
    Published { services: usize },
    /// Task failed validation; nothing was called
    Invalid,
    /// Classifier failed or timed out; no result published
    ClassificationFailed,
    /// Result built but every publish attempt failed
    PublishFailed,
}

pub struct MessageProcessor {
    classifier: Arc<dyn Classifier>,
    locator: Arc<dyn FacilityLocator>,
    publisher: Arc<dyn ResultPublisher>,
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        locator: Arc<dyn FacilityLocator>,
        publisher: Arc<dyn ResultPublisher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            classifier,
            locator,
            publisher,
            config,
        }
    }

    /// Run the full pipeline for one task
    pub async fn process(&self, task: &Task) -> Outcome {
        if let Err(e) = task.validate() {
            warn!("Task {} rejected: {}", task.request_id, e);
            return Outcome::Invalid;
        }

        info!("Processing request {} for client {}", task.request_id, task.client_id);

        let analysis = match self.classify(&task.transcript).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("Classification failed for request {}: {}. Result not published", task.request_id, e);
                self.dead_letter(task, DropStage::Classification, e.to_string()).await;
                return Outcome::ClassificationFailed;
            }
        };
        debug!("Request {} classified as {:?}", task.request_id, analysis.depts);

        let services = self.lookup_services(task, &analysis).await;
        let found = services.len();

        let payload = ResultPayload::completed(task, self.config.include_client_id, analysis, services);

        match self.publish_with_retry(&payload).await {
            Ok(()) => {
                info!("Published result for request {} ({} services)", task.request_id, found);
                Outcome::Published { services: found }
            }
            Err(e) => {
                error!("Dropping result for request {}: {}", task.request_id, e);
                self.dead_letter(task, DropStage::Publish, e.to_string()).await;
                Outcome::PublishFailed
            }
        }
    }

    async fn classify(&self, transcript: &str) -> Result<ClassificationResult, ClassifyError> {
        let timeout = self.config.classify_timeout;
        match tokio::time::timeout(timeout, self.classifier.classify(transcript)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifyError::Timeout(timeout)),
        }
    }

    /// Look up every requested department concurrently; failures only drop that department
    async fn lookup_services(&self, task: &Task, analysis: &ClassificationResult) -> BTreeMap<String, Facility> {
        let center = task.coordinates();
        let lookups = analysis.unique_depts().into_iter().map(|dept| async move {
            let result = tokio::time::timeout(
                self.config.lookup_timeout,
                self.locator.nearest(center, self.config.radius_meters, dept),
            )
            .await
            .unwrap_or(Err(LookupError::Timeout));
            (dept, result)
        });

        let mut services = BTreeMap::new();
        for (dept, result) in join_all(lookups).await {
            match result {
                Ok(Some(facility)) => {
                    debug!("Closest {} for request {}: {} at {:.0} m", dept, task.request_id, facility.name, facility.distance_meters);
                    services.insert(dept.to_string(), facility);
                }
                Ok(None) => {
                    info!("No {} found within {} m for request {}", dept, self.config.radius_meters, task.request_id);
                }
                Err(e) => {
                    warn!("Lookup for {} failed for request {}: {}", dept, task.request_id, e);
                }
            }
        }
        services
    }

    async fn publish_with_retry(&self, payload: &ResultPayload) -> Result<(), PublishError> {
        let attempts = self.config.publish_attempts.max(1);
        let mut delay = self.config.publish_retry_delay;
        let mut attempt = 1;
        loop {
            match self.publisher.publish(payload).await {
                Ok(()) => return Ok(()),
                // Serialization won't get better on retry
                Err(e @ PublishError::Serialize(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "Publish attempt {}/{} for request {} failed: {}",
                        attempt, attempts, payload.request_id, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn dead_letter(&self, task: &Task, stage: DropStage, reason: String) {
        let letter = DeadLetter::new(task, stage, reason);
        if let Err(e) = self.publisher.dead_letter(&letter).await {
            error!("Failed to dead-letter request {}: {}", task.request_id, e);
        }
    }
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::classifier::MockClassifier;
    use crate::services::locator::InMemoryLocator;
    use crate::types::{Coordinates, Department};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    pub(crate) fn fire_task() -> Task {
        Task {
            transcript: "My house is on fire at Elm Street".to_string(),
            lat: 12.9,
            lng: 77.6,
            request_id: "r1".to_string(),
            client_id: "c1".to_string(),
        }
    }

    pub(crate) fn config() -> ProcessorConfig {
        ProcessorConfig {
            radius_meters: 5_000.0,
            include_client_id: true,
            classify_timeout: Duration::from_millis(200),
            lookup_timeout: Duration::from_millis(200),
            publish_attempts: 3,
            publish_retry_delay: Duration::from_millis(1),
        }
    }

    /// Classifier returning a fixed result, or failing
    pub(crate) struct ScriptedClassifier {
        pub result: Option<ClassificationResult>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        pub fn returning(json: &str) -> Self {
            Self {
                result: Some(serde_json::from_str(json).unwrap()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self { result: None, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(&self, _transcript: &str) -> Result<ClassificationResult, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone().ok_or(ClassifyError::EmptyResponse)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Publisher that records results and can fail the first N publishes
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub published: Mutex<Vec<ResultPayload>>,
        pub dead_letters: Mutex<Vec<DeadLetter>>,
        pub fail_first: usize,
        pub attempts: AtomicUsize,
    }

    impl RecordingPublisher {
        pub fn failing(times: usize) -> Self {
            Self { fail_first: times, ..Default::default() }
        }
    }

    #[async_trait]
    impl ResultPublisher for RecordingPublisher {
        async fn publish(&self, payload: &ResultPayload) -> Result<(), PublishError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(PublishError::Broker("no responders".to_string()));
            }
            self.published.lock().await.push(payload.clone());
            Ok(())
        }

        async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError> {
            self.dead_letters.lock().await.push(letter.clone());
            Ok(())
        }
    }

    /// Locator that errors for one department and delegates the rest
    struct FlakyLocator {
        broken: Department,
        inner: InMemoryLocator,
    }

    #[async_trait]
    impl FacilityLocator for FlakyLocator {
        async fn nearest(&self, center: Coordinates, radius: f64, category: &str) -> Result<Option<Facility>, LookupError> {
            if category == self.broken.as_str() {
                return Err(LookupError::Timeout);
            }
            self.inner.nearest(center, radius, category).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    /// Locator that never answers
    struct HangingLocator;

    #[async_trait]
    impl FacilityLocator for HangingLocator {
        async fn nearest(&self, _: Coordinates, _: f64, _: &str) -> Result<Option<Facility>, LookupError> {
            futures::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    pub(crate) fn stations() -> InMemoryLocator {
        InMemoryLocator::new()
            .with(Department::FireBrigade, "fs-1", "Elm Street Fire Station", 12.9072, 77.6)
            .with(Department::Police, "ps-1", "Central Police Station", 12.91, 77.61)
            .with(Department::Hospital, "h-1", "General Hospital", 12.89, 77.59)
    }

    fn processor(
        classifier: Arc<dyn Classifier>,
        locator: Arc<dyn FacilityLocator>,
        publisher: Arc<RecordingPublisher>,
    ) -> MessageProcessor {
        MessageProcessor::new(classifier, locator, publisher, config())
    }

    #[tokio::test]
    async fn end_to_end_fire_scenario_publishes_nearest_station() {
        let classifier = Arc::new(ScriptedClassifier::returning(
            r#"{"depts":["firebrigade"],"person_name":"Unknown","summary":"House fire reported","key_issues":["fire"],"location":"Elm Street"}"#,
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;
        assert_eq!(outcome, Outcome::Published { services: 1 });

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        let payload = &published[0];
        assert_eq!(payload.request_id, "r1");
        assert_eq!(payload.client_id.as_deref(), Some("c1"));
        assert_eq!(payload.status, "completed");
        assert_eq!(payload.transcript_analysis.summary, "House fire reported");

        let station = &payload.closest_nearby_services["firebrigade"];
        assert_eq!(station.id, "fs-1");
        assert!((station.distance_meters - 800.0).abs() < 10.0);
    }

    #[tokio::test]
    async fn services_are_subset_of_classified_departments() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":["police","hospital"],"summary":"Assault"}"#));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        processor.process(&fire_task()).await;

        let published = publisher.published.lock().await;
        let keys: Vec<&str> = published[0].closest_nearby_services.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["hospital", "police"]);
        assert!(!published[0].closest_nearby_services.contains_key("firebrigade"));
    }

    #[tokio::test]
    async fn classifier_failure_publishes_nothing_and_dead_letters() {
        let classifier = Arc::new(ScriptedClassifier::failing());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;

        assert_eq!(outcome, Outcome::ClassificationFailed);
        assert!(publisher.published.lock().await.is_empty());
        let letters = publisher.dead_letters.lock().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].stage, DropStage::Classification);
        assert_eq!(letters[0].task.request_id, "r1");
    }

    #[tokio::test]
    async fn slow_classifier_is_treated_as_failure() {
        let mut classifier = ScriptedClassifier::returning(r#"{"depts":["police"],"summary":"x"}"#);
        classifier.delay = Duration::from_secs(5);
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(Arc::new(classifier), Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;

        assert_eq!(outcome, Outcome::ClassificationFailed);
        assert!(publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_lookup_does_not_affect_other_departments() {
        let classifier = Arc::new(ScriptedClassifier::returning(
            r#"{"depts":["police","firebrigade","hospital"],"summary":"Fire and injuries"}"#,
        ));
        let locator = Arc::new(FlakyLocator { broken: Department::Police, inner: stations() });
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, locator, publisher.clone());

        let outcome = processor.process(&fire_task()).await;
        assert_eq!(outcome, Outcome::Published { services: 2 });

        let published = publisher.published.lock().await;
        let services = &published[0].closest_nearby_services;
        assert!(services.contains_key("firebrigade"));
        assert!(services.contains_key("hospital"));
        assert!(!services.contains_key("police"));
    }

    #[tokio::test]
    async fn hanging_lookup_times_out_and_result_is_still_published() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":["hospital"],"summary":"x"}"#));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(HangingLocator), publisher.clone());

        let outcome = processor.process(&fire_task()).await;

        assert_eq!(outcome, Outcome::Published { services: 0 });
        assert!(publisher.published.lock().await[0].closest_nearby_services.is_empty());
    }

    #[tokio::test]
    async fn unknown_department_is_kept_in_analysis_but_not_looked_up() {
        let classifier = Arc::new(ScriptedClassifier::returning(
            r#"{"depts":["coastguard","firebrigade"],"summary":"Boat fire"}"#,
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;
        assert_eq!(outcome, Outcome::Published { services: 1 });

        let published = publisher.published.lock().await;
        assert_eq!(published[0].transcript_analysis.depts, vec!["coastguard", "firebrigade"]);
        assert!(!published[0].closest_nearby_services.contains_key("coastguard"));
    }

    #[tokio::test]
    async fn no_departments_still_publishes_empty_services() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":[],"summary":"Wrong number"}"#));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        assert_eq!(processor.process(&fire_task()).await, Outcome::Published { services: 0 });
        assert_eq!(publisher.published.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn publish_is_retried_before_giving_up() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":["firebrigade"],"summary":"x"}"#));
        let publisher = Arc::new(RecordingPublisher::failing(2));
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;

        assert_eq!(outcome, Outcome::Published { services: 1 });
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.published.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_after_all_attempts_is_dropped() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":["firebrigade"],"summary":"x"}"#));
        let publisher = Arc::new(RecordingPublisher::failing(usize::MAX));
        let processor = processor(classifier, Arc::new(stations()), publisher.clone());

        let outcome = processor.process(&fire_task()).await;

        assert_eq!(outcome, Outcome::PublishFailed);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
        let letters = publisher.dead_letters.lock().await;
        assert_eq!(letters[0].stage, DropStage::Publish);
    }

    #[tokio::test]
    async fn invalid_task_skips_classifier() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":[],"summary":"x"}"#));
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(classifier.clone(), Arc::new(stations()), publisher.clone());

        let mut task = fire_task();
        task.request_id = String::new();

        assert_eq!(processor.process(&task).await, Outcome::Invalid);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn client_id_omitted_when_disabled() {
        let classifier = Arc::new(ScriptedClassifier::returning(r#"{"depts":[],"summary":"x"}"#));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut cfg = config();
        cfg.include_client_id = false;
        let processor = MessageProcessor::new(classifier, Arc::new(stations()), publisher.clone(), cfg);

        processor.process(&fire_task()).await;

        assert!(publisher.published.lock().await[0].client_id.is_none());
    }

    #[tokio::test]
    async fn redelivered_task_produces_independent_results() {
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = processor(Arc::new(MockClassifier::new()), Arc::new(stations()), publisher.clone());

        processor.process(&fire_task()).await;
        processor.process(&fire_task()).await;

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|p| p.request_id == "r1"));
    }
}
