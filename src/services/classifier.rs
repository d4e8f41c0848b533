//! Transcript classification
//!
//! Configuration via CLASSIFIER_BACKEND:
//! - "gemini" → GeminiClassifier (production, needs GOOGLE_API_KEY)
//! - "mock" → MockClassifier (development, deterministic keywords)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ClassifierBackend, Config};
use crate::types::{ClassificationResult, Department};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("classifier API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("classifier returned no text")]
    EmptyResponse,

    #[error("classifier output is not valid analysis JSON: {0}")]
    Unparsable(#[from] serde_json::Error),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
}

/// Turns transcript text into structured emergency data
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, transcript: &str) -> Result<ClassificationResult, ClassifyError>;

    /// Get the name of this classifier implementation
    fn name(&self) -> &'static str;
}

const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object with these keys:
- depts: list of departments the caller needs, chosen only from "police", "firebrigade", "hospital".
- person_name: full name of the person speaking or discussed, or "Unknown" if not mentioned.
- summary: one or two sentences describing the situation.
- key_issues: list of the main problems the caller is facing.
- location (optional): the place mentioned in the transcript. Omit if none.
- timestamp (optional): a time or date mentioned in the transcript. Omit if none.
- suggestion (optional): immediate instructions the caller can follow while help arrives. Do not tell them to contact emergency services."#;

fn build_prompt(transcript: &str) -> String {
    format!(
        "You summarise emergency call transcripts into structured data.\n\n{}\n\nTranscript:\n{}\n",
        FORMAT_INSTRUCTIONS, transcript
    )
}

/// Parse model text into a classification, tolerating markdown code fences
pub fn parse_model_output(text: &str) -> Result<ClassificationResult, ClassifyError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    Ok(serde_json::from_str(body.trim())?)
}

// ==========================================================================
// GeminiClassifier
// ==========================================================================

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Google Gemini `generateContent` client
pub struct GeminiClassifier {
    config: GeminiConfig,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> Result<Self, ClassifyError> {
        if config.api_key.is_empty() {
            return Err(ClassifyError::NotConfigured("Gemini API key is required".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, transcript: &str) -> Result<ClassificationResult, ClassifyError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: build_prompt(transcript) }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Timeout(self.config.timeout)
                } else {
                    ClassifyError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api { status: status.as_u16(), body });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        let text: String = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClassifyError::EmptyResponse);
        }

        parse_model_output(&text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ==========================================================================
// MockClassifier
// ==========================================================================

/// Keyword-driven classifier for development and tests
pub struct MockClassifier;

impl MockClassifier {
    pub fn new() -> Self {
        Self
    }

    fn departments_for(text: &str) -> Vec<Department> {
        const KEYWORDS: &[(Department, &[&str])] = &[
            (Department::Police, &["robbery", "thief", "stolen", "gun", "attack", "break-in", "assault"]),
            (Department::FireBrigade, &["fire", "smoke", "burning", "flames", "gas leak"]),
            (Department::Hospital, &["injur", "bleed", "unconscious", "heart", "breath", "hurt", "accident"]),
        ];

        let lower = text.to_lowercase();
        KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(dept, _)| *dept)
            .collect()
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, transcript: &str) -> Result<ClassificationResult, ClassifyError> {
        let depts = Self::departments_for(transcript);
        let summary = transcript
            .split(['.', '!', '?'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(ClassificationResult {
            depts: depts.iter().map(|d| d.as_str().to_string()).collect(),
            person_name: "Unknown".to_string(),
            summary,
            key_issues: depts.iter().map(|d| format!("{} response needed", d)).collect(),
            location: None,
            timestamp: None,
            suggestion: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create the classifier selected by configuration
pub fn create_classifier(config: &Config) -> Result<Box<dyn Classifier>, ClassifyError> {
    match config.classifier_backend {
        ClassifierBackend::Mock => {
            tracing::info!("Using MockClassifier");
            Ok(Box::new(MockClassifier::new()))
        }
        ClassifierBackend::Gemini => {
            tracing::info!("Using GeminiClassifier ({})", config.gemini_model);
            let classifier = GeminiClassifier::new(GeminiConfig {
                api_key: config.google_api_key.clone().unwrap_or_default(),
                base_url: config.gemini_base_url.clone(),
                model: config.gemini_model.clone(),
                timeout: config.classify_timeout,
            })?;
            Ok(Box::new(classifier))
        }
    }
}
