//! Embedding collaborators

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

const GEMINI_EMBED_MODEL: &str = "text-embedding-004";

/// Text → fixed-dimension vector, matching the space the index was built in
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifies the vector space; persisted with the index
    fn model(&self) -> String {
        "unspecified".to_string()
    }

    /// Output dimension, when known without calling `embed`
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Gemini embedding endpoint
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: GEMINI_EMBED_MODEL.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::EmbeddingUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
            self.model, self.api_key
        );
        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Embedding request failed: {}", e);
                OrchestrationError::EmbeddingUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::EmbeddingUnavailable(format!(
                "embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::EmbeddingUnavailable(e.to_string()))?;

        Ok(parsed.embedding.values)
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

/// Deterministic bag-of-words feature hashing, L2-normalized.
/// Needs no network; used when no embedding service is configured.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let h = fnv1a(token.as_bytes());
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        ((h % self.dimension as u64) as usize, sign)
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let (index, sign) = self.bucket(&token.to_lowercase());
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

// FNV-1a: bucket assignment must not change between builds.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model(&self) -> String {
        format!("hashing-fnv1a-{}", self.dimension)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}
