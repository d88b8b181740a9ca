//! Boundaries to the external model services.
//!
//! The session only ever sees these two traits; the Ollama client is the
//! production implementation and tests plug in deterministic doubles.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AppResult;

pub mod ollama;

pub use ollama::{OllamaClient, OllamaEmbedder, OllamaGenerator};

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, same order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::AppError::EmbeddingService("empty embedding response".into())
        })
    }

    /// Recorded in the index meta; a different name forces a rebuild.
    fn model_name(&self) -> &str;
}

/// Generates text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Fails with `Timeout` when no answer arrives within `timeout`.
    async fn generate(&self, prompt: &str, timeout: Duration) -> AppResult<String>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Bag-of-keywords embedder: one dimension per keyword, value = occurrences.
    pub struct KeywordEmbedder {
        pub keywords: Vec<&'static str>,
        pub calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        pub fn new(keywords: &[&'static str]) -> Self {
            Self {
                keywords: keywords.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            self.keywords
                .iter()
                .map(|k| lower.matches(k).count() as f32)
                .collect()
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn model_name(&self) -> &str {
            "keyword-test"
        }
    }

    pub struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingService("connection refused".into()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    /// Returns a canned answer and remembers every prompt it was given.
    pub struct RecordingGenerator {
        pub answer: String,
        pub prompts: Mutex<Vec<String>>,
    }

    impl RecordingGenerator {
        pub fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().map(|p| p.len()).unwrap_or(0)
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().ok().and_then(|p| p.last().cloned())
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, prompt: &str, _timeout: Duration) -> AppResult<String> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok(self.answer.clone())
        }

        fn model_name(&self) -> &str {
            "recording-test"
        }
    }

    /// Fails as if the local disk went away mid-request.
    pub struct BrokenDiskGenerator;

    #[async_trait]
    impl Generator for BrokenDiskGenerator {
        async fn generate(&self, _prompt: &str, _timeout: Duration) -> AppResult<String> {
            Err(AppError::Io("read failed: input/output error".into()))
        }

        fn model_name(&self) -> &str {
            "broken-disk-test"
        }
    }

    /// Never answers in time.
    pub struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _prompt: &str, timeout: Duration) -> AppResult<String> {
            tokio::time::sleep(timeout).await;
            Err(AppError::Timeout(format!("no answer within {}s", timeout.as_secs())))
        }

        fn model_name(&self) -> &str {
            "slow-test"
        }
    }
}
