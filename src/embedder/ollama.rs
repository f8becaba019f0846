//! Ollama embedding provider.
//!
//! Calls `POST {base_url}/api/embed` with `{model, input}` and reads the first
//! vector of the `embeddings` array.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{normalize, EmbedderClient, EmbeddingFailure};
use crate::config::EmbedderConfig;
use crate::throttle::Throttle;

/// Ollama embedding client.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
    throttle: Throttle,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Create a client from configuration, sharing `throttle` with other model calls.
    pub fn new(config: &EmbedderConfig, throttle: Throttle) -> Result<Self, EmbeddingFailure> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingFailure::Request(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            client,
            throttle,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[async_trait]
impl EmbedderClient for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        if text.trim().is_empty() {
            return Err(EmbeddingFailure::EmptyInput);
        }

        // Held until the body is read.
        let _permit = self.throttle.acquire().await;
        let response = self
            .client
            .post(self.endpoint())
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingFailure::Timeout
                } else {
                    EmbeddingFailure::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %self.model, "Ollama embed error");
            return Err(EmbeddingFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingFailure::MalformedResponse(e.to_string()))?;

        let vector = parsed.embeddings.into_iter().next().ok_or_else(|| {
            EmbeddingFailure::MalformedResponse("missing 'embeddings' vector".to_string())
        })?;

        normalize(vector, self.dimensions).inspect_err(|e| {
            tracing::warn!(error = %e, model = %self.model, "Rejected embedding");
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder(url: &str, dimensions: usize) -> OllamaEmbedder {
        embedder_with(url, dimensions, Throttle::new(2))
    }

    fn embedder_with(url: &str, dimensions: usize, throttle: Throttle) -> OllamaEmbedder {
        let config = EmbedderConfig {
            base_url: url.to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions,
            timeout_secs: 5,
        };
        OllamaEmbedder::new(&config, throttle).unwrap()
    }

    #[tokio::test]
    async fn test_permit_held_while_body_streams() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(std::time::Duration::from_millis(300));
                w.write_all(br#"{"embeddings": [[3.0, 4.0]]}"#)
            })
            .create_async()
            .await;

        let throttle = Throttle::new(1);
        let embedder = embedder_with(&server.url(), 2, throttle.clone());
        let call = tokio::spawn(async move { embedder.embed("slow").await });

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(throttle.available(), 0);
        let vector = call.await.unwrap().unwrap();
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert_eq!(throttle.available(), 1);
    }

    #[tokio::test]
    async fn test_embed_normalizes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embed")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "nomic-embed-text",
                "input": "TypeScript adds types"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"model": "nomic-embed-text", "embeddings": [[3.0, 0.0, 4.0]]}"#)
            .create_async()
            .await;

        let vector = embedder(&server.url(), 3)
            .embed("TypeScript adds types")
            .await
            .unwrap();
        mock.assert_async().await;

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[2] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embed_wrong_dimension_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_body(r#"{"embeddings": [[0.1, 0.2]]}"#)
            .create_async()
            .await;

        let err = embedder(&server.url(), 768).embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingFailure::DimensionMismatch {
                expected: 768,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_embed_zero_vector_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_body(r#"{"embeddings": [[0.0, 0.0, 0.0]]}"#)
            .create_async()
            .await;

        let err = embedder(&server.url(), 3).embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingFailure::ZeroNorm));
    }

    #[tokio::test]
    async fn test_embed_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let err = embedder(&server.url(), 3).embed("hello").await.unwrap_err();
        match err {
            EmbeddingFailure::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embed_missing_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_body(r#"{"embeddings": []}"#)
            .create_async()
            .await;

        let err = embedder(&server.url(), 3).embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingFailure::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_empty_text_never_hits_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embed")
            .expect(0)
            .create_async()
            .await;

        let err = embedder(&server.url(), 3).embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbeddingFailure::EmptyInput));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_keeps_per_item_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_body(r#"{"embeddings": [[1.0, 1.0]]}"#)
            .expect(2)
            .create_async()
            .await;

        let texts = vec!["a".to_string(), String::new(), "b".to_string()];
        let results = embedder(&server.url(), 2).embed_batch(&texts).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EmbeddingFailure::EmptyInput)));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Port 9 (discard) is essentially never listening for HTTP.
        let err = embedder("http://127.0.0.1:9", 3)
            .embed("hello")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingFailure::Request(_) | EmbeddingFailure::Timeout
        ));
    }
}
