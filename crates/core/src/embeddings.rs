use crate::error::IngestError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Maps text to vectors of one fixed width.
pub trait Embedder {
    /// Identifies the model; persisted next to every index built with it.
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| IngestError::Embedding("no vector returned for query".to_string()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        (**self).embed(texts)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        (**self).embed_query(text)
    }
}

#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, IngestError> {
        if dimensions == 0 {
            return Err(IngestError::InvalidConfiguration(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self::with_dimensions(dimensions))
    }

    fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::with_dimensions(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl HttpEmbedderConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            dimensions,
            api_key: None,
            timeout: Duration::from_secs(60),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking client for OpenAI-compatible `/embeddings` endpoints.
///
/// Must be constructed and called outside of an async context, or from a
/// blocking thread such as `tokio::task::spawn_blocking`.
pub struct HttpEmbedder {
    client: Client,
    endpoint: url::Url,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, IngestError> {
        if config.model.trim().is_empty() {
            return Err(IngestError::InvalidConfiguration(
                "embedding model name is required".to_string(),
            ));
        }
        if config.dimensions == 0 || config.batch_size == 0 {
            return Err(IngestError::InvalidConfiguration(
                "embedding dimensions and batch size must be greater than zero".to_string(),
            ));
        }

        let endpoint = url::Url::parse(&format!(
            "{}/embeddings",
            config.base_url.trim_end_matches('/')
        ))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
        });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        debug!(endpoint = %self.endpoint, batch = inputs.len(), "embedding request");
        let response = request.send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(IngestError::Embedding(format!(
                "embedding request to {} returned {status}: {body}",
                self.endpoint
            )));
        }

        let payload: EmbeddingResponse = response.json()?;
        vectors_from_response(payload, inputs.len(), self.config.dimensions)
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}

fn vectors_from_response(
    mut payload: EmbeddingResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    if payload.data.len() != expected_count {
        return Err(IngestError::Embedding(format!(
            "endpoint returned {} embeddings for {} inputs",
            payload.data.len(),
            expected_count
        )));
    }

    payload.data.sort_by_key(|entry| entry.index);
    payload
        .data
        .into_iter()
        .map(|entry| {
            if entry.embedding.len() != dimensions {
                return Err(IngestError::DimensionMismatch {
                    expected: dimensions,
                    actual: entry.embedding.len(),
                });
            }
            Ok(entry.embedding)
        })
        .collect()
}
