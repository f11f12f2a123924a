/// Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint
/// (OpenAI, llama.cpp server, vLLM, Ollama's compatibility layer).
///
/// Uses the blocking reqwest client: call it from worker threads, not from
/// inside an async task.
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    batch_size: usize,
    api_key: Option<String>,
    client: OnceLock<Client>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| EmbedderError::Request(format!("{var} is not set")))?,
            ),
            None => None,
        };

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout: Duration::from_secs(config.timeout_secs),
            batch_size: config.batch_size,
            api_key,
            client: OnceLock::new(),
        })
    }

    /// Shared HTTP client, built on first use.
    fn client(&self) -> Result<&Client, EmbedderError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;
        Ok(self.client.get_or_init(|| built))
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut request = self.client()?.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Embedding {} texts via {}", texts.len(), self.endpoint);
        let response = request
            .send()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedderError::Request(format!("HTTP {status}: {body}")));
        }

        let body: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;
        order_embeddings(body, texts.len(), self.dimensions)
    }
}

/// Embed `texts` in requests of at most `batch_size` inputs, keeping input order.
fn embed_in_batches<F>(
    texts: &[&str],
    batch_size: usize,
    mut request: F,
) -> Result<Vec<Vec<f32>>, EmbedderError>
where
    F: FnMut(&[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        vectors.extend(request(batch)?);
    }
    Ok(vectors)
}

/// Put response vectors back in input order and check their shape.
fn order_embeddings(
    response: EmbeddingResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if response.data.len() != expected_count {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            response.data.len()
        )));
    }

    let mut data = response.data;
    data.sort_by_key(|d| d.index);

    let mut vectors = Vec::with_capacity(data.len());
    for (position, item) in data.into_iter().enumerate() {
        if item.index != position {
            return Err(EmbedderError::InvalidResponse(format!(
                "missing embedding for input {position}"
            )));
        }
        if item.embedding.len() != dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: dimensions,
                found: item.embedding.len(),
            });
        }
        vectors.push(item.embedding);
    }
    Ok(vectors)
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.request(&[text])?
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("empty response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        embed_in_batches(texts, self.batch_size, |batch| self.request(batch))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> EmbeddingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_reorders_by_index() {
        let response = parse(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ], "model": "m"}"#,
        );
        let vectors = order_embeddings(response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_count_mismatch() {
        let response = parse(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#);
        assert!(matches!(
            order_embeddings(response, 2, 1),
            Err(EmbedderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let response = parse(r#"{"data": [{"index": 0, "embedding": [1.0, 2.0, 3.0]}]}"#);
        assert!(matches!(
            order_embeddings(response, 1, 384),
            Err(EmbedderError::DimensionMismatch {
                expected: 384,
                found: 3
            })
        ));
    }

    #[test]
    fn test_batches_keep_input_order() {
        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let mut sizes = Vec::new();
        let vectors = embed_in_batches(&texts, 2, |batch| {
            sizes.push(batch.len());
            Ok(batch.iter().map(|t| vec![t.len() as f32]).collect())
        })
        .unwrap();

        assert_eq!(sizes, vec![2, 2, 1]);
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_batch_failure_stops_the_run() {
        let texts = ["a", "b", "c", "d"];
        let mut calls = 0;
        let result = embed_in_batches(&texts, 1, |_| {
            calls += 1;
            if calls == 2 {
                Err(EmbedderError::Request("HTTP 503".to_string()))
            } else {
                Ok(vec![vec![0.0]])
            }
        });
        assert!(matches!(result, Err(EmbedderError::Request(_))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_client_is_built_once() {
        let config = EmbeddingConfig {
            provider: "http".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        let first = embedder.client().unwrap();
        let second = embedder.client().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = EmbeddingConfig {
            provider: "http".to_string(),
            api_key_env: Some("DOCSYNC_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbedder::new(&config).is_err());
    }
}
