//! Image generation backends.
//!
//! Both backends take the decrypted original photo plus a [`PromptConfig`]
//! and return the raw bytes of one generated view. Progress is reported
//! through a [`ProgressSink`] whenever the backend exposes it.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, GenerationBackend};
use crate::services::images::ImageKind;
use crate::services::prompts::PromptConfig;

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com";

pub struct GenerationRequest {
    pub image: Vec<u8>,
    pub kind: ImageKind,
    pub prompt: PromptConfig,
}

#[derive(Debug)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub kind: ImageKind,
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, step: u32, total: u32);
}

/// Sink that drops every report.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _step: u32, _total: u32) {}
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<GeneratedImage, GenerationError>;
}

pub fn from_config(config: &AppConfig) -> Result<Arc<dyn ImageGenerator>, GenerationError> {
    match config.generation_backend {
        GenerationBackend::Replicate => {
            let token = config
                .replicate_api_token
                .clone()
                .ok_or_else(|| GenerationError::Config("REPLICATE_API_TOKEN is not set".into()))?;
            let version = config
                .replicate_model_version
                .clone()
                .ok_or_else(|| GenerationError::Config("REPLICATE_MODEL_VERSION is not set".into()))?;
            Ok(Arc::new(ReplicateClient::new(
                token,
                version,
                &config.replicate_base_url,
                Duration::from_millis(config.replicate_poll_interval_ms),
            )))
        }
        GenerationBackend::Local => {
            let url = config
                .local_inference_url
                .as_deref()
                .ok_or_else(|| GenerationError::Config("LOCAL_INFERENCE_URL is not set".into()))?;
            Ok(Arc::new(LocalInferenceClient::new(url)))
        }
    }
}

/// Find the last `step/total` pair in a backend log, e.g. a tqdm line
/// such as ` 50%|#####     | 15/30 [00:05<00:05]`.
pub fn parse_progress(logs: &str) -> Option<(u32, u32)> {
    logs.split(|c: char| c.is_whitespace() || c == '|')
        .rev()
        .find_map(|token| {
            let (step, total) = token.split_once('/')?;
            let step: u32 = step.parse().ok()?;
            let total: u32 = total.parse().ok()?;
            (total > 0 && step <= total).then_some((step, total))
        })
}

/// Decode generated bytes and make sure they are an accepted image.
fn checked_image(data: Vec<u8>) -> Result<GeneratedImage, GenerationError> {
    let kind = ImageKind::detect(&data).map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
    Ok(GeneratedImage { data, kind })
}

async fn error_body(response: reqwest::Response) -> GenerationError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    GenerationError::Remote(format!("HTTP {status}: {body}"))
}

// ---------------------------------------------------------------------------
// Replicate
// ---------------------------------------------------------------------------

/// Client for the Replicate predictions API.
pub struct ReplicateClient {
    http: Client,
    api_token: String,
    model_version: String,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    image: String,
    prompt: &'a str,
    negative_prompt: &'a str,
    strength: f32,
    num_inference_steps: u32,
    guidance_scale: f32,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    logs: Option<String>,
    urls: PredictionUrls,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: String,
}

/// First URL of a prediction output, which is either a string or a list.
fn output_url(output: &serde_json::Value) -> Option<&str> {
    match output {
        serde_json::Value::String(url) => Some(url.as_str()),
        serde_json::Value::Array(items) => items.iter().find_map(|v| v.as_str()),
        _ => None,
    }
}

impl ReplicateClient {
    pub fn new(api_token: String, model_version: String, base_url: &str, poll_interval: Duration) -> Self {
        Self {
            http: Client::new(),
            api_token,
            model_version,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    async fn create(&self, request: &GenerationRequest) -> Result<Prediction, GenerationError> {
        let body = PredictionRequest {
            version: &self.model_version,
            input: PredictionInput {
                image: request.kind.data_uri(&request.image),
                prompt: &request.prompt.prompt,
                negative_prompt: &request.prompt.negative_prompt,
                strength: request.prompt.strength,
                num_inference_steps: request.prompt.num_inference_steps,
                guidance_scale: request.prompt.guidance_scale,
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch(&self, url: &str) -> Result<Prediction, GenerationError> {
        let response = self.http.get(url).bearer_auth(&self.api_token).send().await?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        Ok(response.json().await?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, GenerationError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<GeneratedImage, GenerationError> {
        let mut prediction = self.create(request).await?;
        tracing::info!(prediction_id = %prediction.id, "Replicate prediction created");

        let mut last_reported = None;
        loop {
            if let Some(current) = prediction.logs.as_deref().and_then(parse_progress) {
                if last_reported != Some(current) {
                    progress.report(current.0, current.1).await;
                    last_reported = Some(current);
                }
            }

            match prediction.status.as_str() {
                "succeeded" => break,
                "failed" | "canceled" => {
                    let reason = prediction
                        .error
                        .as_ref()
                        .map(|e| match e {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| format!("prediction {}", prediction.status));
                    return Err(GenerationError::Remote(reason));
                }
                _ => {}
            }

            tokio::time::sleep(self.poll_interval).await;
            let poll_url = prediction.urls.get.clone();
            prediction = self.fetch(&poll_url).await?;
        }

        let url = prediction
            .output
            .as_ref()
            .and_then(output_url)
            .ok_or_else(|| GenerationError::InvalidOutput("prediction returned no output URL".into()))?
            .to_string();

        tracing::debug!(prediction_id = %prediction.id, "Downloading prediction output");
        checked_image(self.download(&url).await?)
    }
}

// ---------------------------------------------------------------------------
// Local inference server
// ---------------------------------------------------------------------------

/// Client for a self-hosted img2img server exposing `POST /generate`.
pub struct LocalInferenceClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct LocalRequest<'a> {
    image: String,
    prompt: &'a str,
    negative_prompt: &'a str,
    strength: f32,
    num_inference_steps: u32,
    guidance_scale: f32,
}

#[derive(Deserialize)]
struct LocalResponse {
    image: String,
}

impl LocalInferenceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageGenerator for LocalInferenceClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<GeneratedImage, GenerationError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let body = LocalRequest {
            image: engine.encode(&request.image),
            prompt: &request.prompt.prompt,
            negative_prompt: &request.prompt.negative_prompt,
            strength: request.prompt.strength,
            num_inference_steps: request.prompt.num_inference_steps,
            guidance_scale: request.prompt.guidance_scale,
        };

        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let payload: LocalResponse = response.json().await?;
        let data = engine
            .decode(payload.image.as_bytes())
            .map_err(|e| GenerationError::InvalidOutput(format!("invalid base64 image: {e}")))?;

        let steps = request.prompt.num_inference_steps;
        progress.report(steps, steps).await;
        checked_image(data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation backend error: {0}")]
    Remote(String),

    #[error("Generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid generation output: {0}")]
    InvalidOutput(String),

    #[error("Generation backend misconfigured: {0}")]
    Config(String),
}
