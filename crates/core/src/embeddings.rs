use crate::error::EmbeddingError;
use crate::models::EmbeddingOptions;
use crate::traits::{EmbeddingProvider, EmbeddingRequest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Response fields that may carry the vector, tried in this order.
pub const RESPONSE_VECTOR_FIELDS: [&str; 3] = ["embedding", "vector", "embeddings"];

/// Turns text into fixed-size vectors through an [`EmbeddingProvider`],
/// enforcing the configured dimensionality and call timeout.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    options: EmbeddingOptions,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: EmbeddingOptions) -> Self {
        Self { provider, options }
    }

    pub fn dimensions(&self) -> usize {
        self.options.dimensions
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            input_text: text,
            dimensions: self.options.dimensions,
            normalize: self.options.normalize,
        };

        let response = tokio::time::timeout(
            self.options.timeout,
            self.provider.invoke(&self.options.model_id, &request),
        )
        .await
        .map_err(|_| {
            EmbeddingError::Provider(format!(
                "embedding call timed out after {:?}",
                self.options.timeout
            ))
        })??;

        let (field, vector) = extract_vector(&response)?;
        debug!(field, length = vector.len(), "parsed embedding response");

        if vector.len() != self.options.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.options.dimensions,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }

    /// Embeds every text with at most `concurrency` calls in flight. The output
    /// is in input order; the first failure drops all outstanding calls.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        stream::iter(texts.iter().enumerate())
            .map(|(index, text)| async move {
                self.embed(text).await.map_err(|error| {
                    warn!(index, %error, "chunk embedding failed");
                    error
                })
            })
            .buffered(self.options.concurrency.max(1))
            .try_collect()
            .await
    }
}

pub fn extract_vector(response: &Value) -> Result<(&'static str, Vec<f32>), EmbeddingError> {
    for field in RESPONSE_VECTOR_FIELDS {
        let Some(candidate) = response.get(field) else {
            continue;
        };

        match candidate.as_array() {
            Some(values) if !values.is_empty() => return Ok((field, parse_vector(field, values)?)),
            _ => continue,
        }
    }

    Err(EmbeddingError::Provider(format!(
        "response has none of the fields {}",
        RESPONSE_VECTOR_FIELDS.join(", ")
    )))
}

fn parse_vector(field: &str, values: &[Value]) -> Result<Vec<f32>, EmbeddingError> {
    if let [Value::Array(inner)] = values {
        return parse_vector(field, inner);
    }

    values
        .iter()
        .map(|value| {
            value.as_f64().map(|number| number as f32).ok_or_else(|| {
                EmbeddingError::Provider(format!("field `{field}` holds a non-numeric value: {value}"))
            })
        })
        .collect()
}

/// Offline provider hashing character trigrams into buckets. Deterministic,
/// useful for local runs without a model endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterNgramProvider;

impl CharacterNgramProvider {
    pub fn vectorize(text: &str, dimensions: usize, normalize: bool) -> Vec<f32> {
        let mut vector = vec![0f32; dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        if normalize {
            let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for value in &mut vector {
                    *value /= magnitude;
                }
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramProvider {
    async fn invoke(
        &self,
        _model_id: &str,
        request: &EmbeddingRequest<'_>,
    ) -> Result<Value, EmbeddingError> {
        let vector = Self::vectorize(request.input_text, request.dimensions, request.normalize);
        Ok(json!({ "embedding": vector }))
    }
}

/// Calls `POST {endpoint}/model/{model_id}/invoke`, retrying throttling,
/// server errors and connection failures with exponential backoff.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    max_attempts: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        request_timeout: Duration,
        max_attempts: usize,
    ) -> Result<Self, EmbeddingError> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|error| EmbeddingError::Provider(format!("invalid endpoint {endpoint}: {error}")))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| EmbeddingError::Provider(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn invoke_url(&self, model_id: &str) -> Result<Url, EmbeddingError> {
        self.endpoint
            .join(&format!("model/{model_id}/invoke"))
            .map_err(|error| EmbeddingError::Provider(format!("invalid model id {model_id}: {error}")))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn invoke(
        &self,
        model_id: &str,
        request: &EmbeddingRequest<'_>,
    ) -> Result<Value, EmbeddingError> {
        let url = self.invoke_url(model_id)?;
        let mut attempt = 0usize;

        loop {
            let mut builder = self
                .client
                .post(url.clone())
                .header("accept", "application/json")
                .json(request);
            if let Some(api_key) = &self.api_key {
                builder = builder.bearer_auth(api_key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|error| {
                            EmbeddingError::Provider(format!("failed to decode embedding response: {error}"))
                        });
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        warn!(%status, attempt, "retrying embedding request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::Provider(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(error) => {
                    if (error.is_connect() || error.is_timeout()) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        warn!(%error, attempt, "retrying embedding request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::Provider(error.to_string()));
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}
