use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Embedder, Generator};
use crate::error::{AppError, AppResult};

/// Thin HTTP client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| AppError::Validation(format!("Invalid Ollama URL '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Ollama URL must be http(s), got '{}'",
                parsed.scheme()
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the locally pulled models (`GET /api/tags`).
    /// Doubles as the startup reachability check.
    pub async fn list_models(&self) -> AppResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                AppError::ModelService(format!(
                    "Ollama is not reachable at {}: {e}. Is `ollama serve` running?",
                    self.base_url
                ))
            })?;
        if !res.status().is_success() {
            return Err(AppError::ModelService(format!(
                "Ollama health check failed with status {}",
                res.status()
            )));
        }
        let tags: TagsResponse = res
            .json()
            .await
            .map_err(|e| AppError::ModelService(format!("Invalid /api/tags response: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check reachability and warn about models that have not been pulled.
    pub async fn health_check(&self, required: &[&str]) -> AppResult<()> {
        let available = self.list_models().await?;
        for model in required {
            if !has_model(&available, model) {
                tracing::warn!(model = %model, "model not found locally, run `ollama pull {model}`");
            }
        }
        tracing::info!(url = %self.base_url, models = available.len(), "ollama reachable");
        Ok(())
    }
}

/// `nomic-embed-text` is listed by Ollama as `nomic-embed-text:latest`.
fn has_model(available: &[String], wanted: &str) -> bool {
    available
        .iter()
        .any(|name| name == wanted || name.strip_suffix(":latest") == Some(wanted))
}

fn map_send_error(e: reqwest::Error, what: &str, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(format!("{what} took longer than {}s", timeout.as_secs()))
    } else if what == "embedding" {
        AppError::EmbeddingService(format!("Ollama request failed: {e}"))
    } else {
        AppError::ModelService(format!("Ollama request failed: {e}"))
    }
}

/// Embeddings via `POST /api/embed`.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.client.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let res = self
            .client
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_send_error(e, "embedding", self.timeout))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingService(format!(
                "Ollama /api/embed returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = res
            .json()
            .await
            .map_err(|e| AppError::EmbeddingService(format!("Invalid embedding response: {e}")))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(AppError::EmbeddingService(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Non-streaming completions via `POST /api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, timeout: Duration) -> AppResult<String> {
        let url = format!("{}/api/generate", self.client.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });

        let request = async {
            let res = self
                .client
                .http
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| map_send_error(e, "generation", timeout))?;

            let status = res.status();
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(AppError::ModelService(format!(
                    "Ollama /api/generate returned {status}: {body}"
                )));
            }

            let json: serde_json::Value = res
                .json()
                .await
                .map_err(|e| AppError::ModelService(format!("Invalid Ollama response: {e}")))?;

            json["response"]
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| AppError::ModelService("Ollama response has no 'response' field".into()))
        };

        tokio::time::timeout(timeout, request).await.map_err(|_| {
            AppError::Timeout(format!(
                "model '{}' did not answer within {}s; try a smaller model such as qwen2.5:0.5b",
                self.model,
                timeout.as_secs()
            ))
        })?
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_urls() {
        assert!(OllamaClient::new("not a url").is_err());
        assert!(OllamaClient::new("ftp://localhost:11434").is_err());
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_has_model_latest_suffix() {
        let available = vec!["nomic-embed-text:latest".to_string(), "llama3.2:1b".to_string()];
        assert!(has_model(&available, "nomic-embed-text"));
        assert!(has_model(&available, "llama3.2:1b"));
        assert!(!has_model(&available, "qwen2.5:3b"));
    }

    #[tokio::test]
    async fn test_generate_reads_response_field() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"model":"llama3.2:1b","response":"  The fox escaped.  ","done":true}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url()).unwrap();
        let generator = OllamaGenerator::new(client, "llama3.2:1b");
        let answer = generator.generate("prompt", Duration::from_secs(5)).await.unwrap();
        assert_eq!(answer, "The fox escaped.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .with_status(404)
            .with_body(r#"{"error":"model not found"}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url()).unwrap();
        let generator = OllamaGenerator::new(client, "qwen2.5:3b");
        let err = generator.generate("prompt", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AppError::ModelService(_)));
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"model":"nomic-embed-text","embeddings":[[0.1,0.2],[0.3,0.4]]}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url()).unwrap();
        let embedder = OllamaEmbedder::new(client, "nomic-embed-text", Duration::from_secs(5));
        let vectors = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn test_embed_count_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings":[[0.1,0.2]]}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url()).unwrap();
        let embedder = OllamaEmbedder::new(client, "nomic-embed-text", Duration::from_secs(5));
        let err = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmbeddingService(_)));
    }

    #[tokio::test]
    async fn test_list_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"llama3.2:1b"},{"name":"nomic-embed-text:latest"}]}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url()).unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2:1b", "nomic-embed-text:latest"]);
        assert!(client.health_check(&["qwen2.5:3b"]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Port 9 (discard) is essentially never served locally
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, AppError::ModelService(_)));
    }
}
