//! Embedding HTTP client. Computes a fixed-dimension (384) float32 vector
//! over `title + " " + body` for the index to store alongside each row.

use serde::Deserialize;

use crate::errors::{VaultError, VaultResult};
use crate::storage::EMBEDDING_DIM;

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub embedding_url: String,
    pub embedding_model: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        EmbeddingSettings {
            embedding_url: "http://127.0.0.1:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        }
    }
}

impl EmbeddingClient {
    pub fn new(settings: &EmbeddingSettings) -> Self {
        Self {
            base_url: settings.embedding_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Embeds a batch of `title + " " + body` strings. Every returned vector
    /// must be `EMBEDDING_DIM`-wide; a mismatch is reported as an
    /// `Embedding` error rather than silently truncated/padded.
    pub async fn embed_batch(&self, inputs: &[String]) -> VaultResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VaultError::Embedding(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VaultError::Embedding(format!(
                "embedding request failed: {status} {text}"
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Embedding(e.to_string()))?;

        let vectors = payload
            .embeddings
            .or_else(|| payload.embedding.map(|v| vec![v]))
            .ok_or_else(|| VaultError::Embedding("embedding response missing vectors".to_string()))?;

        for vector in &vectors {
            if vector.len() != EMBEDDING_DIM {
                return Err(VaultError::Embedding(format!(
                    "expected {EMBEDDING_DIM}-dim embedding, got {}",
                    vector.len()
                )));
            }
        }

        Ok(vectors)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Option<Vec<Vec<f32>>>,
    embedding: Option<Vec<f32>>,
}
