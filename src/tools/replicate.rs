use crate::error::ProviderError;
use crate::models::{ImageArtifact, ImageRequest, Prediction, PredictionRequest, ProviderMetadata};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

pub const SDXL_VERSION: &str = "c221b2b8ef527988fb59bf24a8b97c4561f1c671f73bd389f866bfb27c061316";
pub const LLAVA_VERSION: &str = "2facb4a474a0462c15041b78b1ad70952ea46b5ec6ad29583c0b29dbd4249591";

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageArtifact, ProviderError>;
}

#[async_trait]
pub trait ImageCritic: Send + Sync {
    async fn critique(
        &self,
        image: &ImageArtifact,
        instruction: &str,
    ) -> Result<String, ProviderError>;
}

/// Minimal Replicate predictions client: create, poll, cancel.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl ReplicateClient {
    pub fn new(
        http: reqwest::Client,
        token: &str,
        base_url: &str,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            request_timeout,
        }
    }

    /// Creates a prediction and polls it until it finishes or `wait` runs out.
    /// On timeout the prediction is cancelled best-effort.
    pub async fn run(
        &self,
        version: &str,
        input: Value,
        wait: Duration,
    ) -> Result<Prediction, ProviderError> {
        self.run_until(version, input, Instant::now() + wait, wait).await
    }

    /// Like [`run`](Self::run) against a deadline the caller already started.
    /// Every request, including the cancel, is bounded by it.
    #[instrument(skip(self, input, deadline))]
    pub async fn run_until(
        &self,
        version: &str,
        input: Value,
        deadline: Instant,
        wait: Duration,
    ) -> Result<Prediction, ProviderError> {
        let mut prediction = timeout_at(deadline, self.create(version, input))
            .await
            .map_err(|_| ProviderError::Timeout(wait))??;
        info!(id = %prediction.id, status = %prediction.status, "prediction created");

        while !prediction.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                self.cancel(&prediction.id).await;
                return Err(ProviderError::Timeout(wait));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            prediction = match timeout_at(deadline, self.get(&prediction.id)).await {
                Ok(polled) => polled?,
                Err(_) => {
                    self.cancel(&prediction.id).await;
                    return Err(ProviderError::Timeout(wait));
                }
            };
            debug!(id = %prediction.id, status = %prediction.status, "polled prediction");
        }

        match prediction.status.as_str() {
            "succeeded" => Ok(prediction),
            "canceled" => Err(ProviderError::Rejected("prediction was canceled".to_string())),
            _ => Err(ProviderError::Rejected(
                prediction
                    .error
                    .as_ref()
                    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .unwrap_or_else(|| "prediction failed".to_string()),
            )),
        }
    }

    async fn create(&self, version: &str, input: Value) -> Result<Prediction, ProviderError> {
        let request = PredictionRequest {
            version: version.to_string(),
            input,
        };
        let response = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.request_timeout))?;
        self.decode(response).await
    }

    async fn get(&self, id: &str) -> Result<Prediction, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/predictions/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.request_timeout))?;
        self.decode(response).await
    }

    async fn cancel(&self, id: &str) {
        let result = self
            .http
            .post(format!("{}/v1/predictions/{}/cancel", self.base_url, id))
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await;
        if let Err(e) = result {
            warn!(id, "failed to cancel prediction: {}", e);
        }
    }

    async fn decode(&self, response: reqwest::Response) -> Result<Prediction, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        response
            .json::<Prediction>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    pub async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ProviderError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.request_timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.request_timeout))?;
        Ok((bytes.to_vec(), content_type))
    }
}

/// Stable Diffusion XL on Replicate.
pub struct ReplicateImageGenerator {
    client: ReplicateClient,
    version: String,
    timeout: Duration,
}

impl ReplicateImageGenerator {
    pub fn new(client: ReplicateClient, timeout: Duration) -> Self {
        Self {
            client,
            version: SDXL_VERSION.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ImageGenerator for ReplicateImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageArtifact, ProviderError> {
        let mut input = json!({
            "prompt": request.prompt(),
            "width": request.style.width,
            "height": request.style.height,
        });
        if let Some(negative) = &request.style.negative_prompt {
            input["negative_prompt"] = json!(negative);
        }

        let deadline = Instant::now() + self.timeout;
        let prediction = self
            .client
            .run_until(&self.version, input, deadline, self.timeout)
            .await?;
        let url = first_output_url(prediction.output.as_ref()).ok_or(ProviderError::Empty)?;
        let (bytes, content_type) = timeout_at(deadline, self.client.download(&url))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;
        if bytes.is_empty() {
            return Err(ProviderError::Empty);
        }

        Ok(ImageArtifact {
            bytes,
            extension: image_extension(&url, content_type.as_deref()),
            metadata: ProviderMetadata {
                provider: "replicate".to_string(),
                model: format!("stability-ai/sdxl:{}", self.version),
                prediction_id: Some(prediction.id),
                source_url: Some(url),
            },
        })
    }
}

/// LLaVA vision model on Replicate.
pub struct ReplicateImageCritic {
    client: ReplicateClient,
    version: String,
    timeout: Duration,
}

impl ReplicateImageCritic {
    pub fn new(client: ReplicateClient, timeout: Duration) -> Self {
        Self {
            client,
            version: LLAVA_VERSION.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ImageCritic for ReplicateImageCritic {
    async fn critique(
        &self,
        image: &ImageArtifact,
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let encoded = STANDARD.encode(&image.bytes);
        let data_uri = format!("data:{};base64,{}", image.mime_type(), encoded);
        let input = json!({
            "image": data_uri,
            "prompt": instruction,
            "max_tokens": 512,
        });
        let prediction = self.client.run(&self.version, input, self.timeout).await?;
        let text = output_text(prediction.output.as_ref());
        if text.trim().is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(text.trim().to_string())
    }
}

fn first_output_url(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

/// Streaming language models return their output as an array of tokens.
fn output_text(output: Option<&Value>) -> String {
    match output {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

fn image_extension(url: &str, content_type: Option<&str>) -> String {
    let from_type = content_type.and_then(|ct| match ct.split(';').next().unwrap_or("").trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    });
    if let Some(ext) = from_type {
        return ext.to_string();
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "jpg".to_string(),
        Some("webp") => "webp".to_string(),
        _ => "png".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct StubGenerator {
        pub delay: Duration,
        pub fail: bool,
    }

    #[async_trait]
    impl ImageGenerator for StubGenerator {
        async fn generate(&self, _request: &ImageRequest) -> Result<ImageArtifact, ProviderError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Rejected("model offline".to_string()));
            }
            Ok(ImageArtifact {
                bytes: vec![137, 80, 78, 71, 1, 2, 3],
                extension: "png".to_string(),
                metadata: ProviderMetadata {
                    provider: "stub".to_string(),
                    model: "stub-sdxl".to_string(),
                    prediction_id: Some("p-1".to_string()),
                    source_url: None,
                },
            })
        }
    }

    pub struct StubCritic(pub Result<&'static str, ()>);

    #[async_trait]
    impl ImageCritic for StubCritic {
        async fn critique(
            &self,
            image: &ImageArtifact,
            instruction: &str,
        ) -> Result<String, ProviderError> {
            assert!(!image.bytes.is_empty());
            assert!(instruction.contains("Rate from 1-10"));
            self.0
                .map(str::to_string)
                .map_err(|_| ProviderError::Transport("vision model down".to_string()))
        }
    }
}
