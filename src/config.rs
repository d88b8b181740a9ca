// ============================================
// CONFIGURATION
// Defaults, optional TOML file, model allow-list
// ============================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::rag::ChunkPolicy;
use crate::session::RetrievalSettings;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Small local models the tool is tuned for, sorted by speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum LocalModel {
    #[value(name = "tinyllama:1.1b")]
    #[serde(rename = "tinyllama:1.1b")]
    TinyLlama,
    #[default]
    #[value(name = "llama3.2:1b")]
    #[serde(rename = "llama3.2:1b")]
    Llama32OneB,
    #[value(name = "qwen2.5:0.5b")]
    #[serde(rename = "qwen2.5:0.5b")]
    QwenHalfB,
    #[value(name = "qwen2.5:1.5b")]
    #[serde(rename = "qwen2.5:1.5b")]
    QwenOneAndHalfB,
    #[value(name = "qwen2.5:3b")]
    #[serde(rename = "qwen2.5:3b")]
    QwenThreeB,
}

impl LocalModel {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TinyLlama => "tinyllama:1.1b",
            Self::Llama32OneB => "llama3.2:1b",
            Self::QwenHalfB => "qwen2.5:0.5b",
            Self::QwenOneAndHalfB => "qwen2.5:1.5b",
            Self::QwenThreeB => "qwen2.5:3b",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::TinyLlama => "fastest, 637MB, 2GB RAM (basic quality)",
            Self::Llama32OneB => "recommended, 1.3GB, 3GB RAM (good quality)",
            Self::QwenHalfB => "smallest, 397MB, 2GB RAM (basic quality)",
            Self::QwenOneAndHalfB => "balanced, 1GB, 3GB RAM (good quality)",
            Self::QwenThreeB => "best quality, 2GB, 4GB RAM (slower)",
        }
    }
}

impl fmt::Display for LocalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Every tunable of a run. Missing keys in a config file fall back to defaults;
/// CLI flags are applied on top by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ollama_url: String,
    pub model: LocalModel,
    pub embedding_model: String,
    pub top_k: usize,
    /// Hits scoring below this are not used as context.
    pub similarity_floor: f32,
    pub request_timeout_secs: u64,
    pub embed_batch_size: usize,
    pub chunking: ChunkPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model: LocalModel::default(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            top_k: DEFAULT_TOP_K,
            similarity_floor: 0.0,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            embed_batch_size: 32,
            chunking: ChunkPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Read a TOML config file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Io(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Validation(format!("Invalid config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.top_k == 0 {
            return Err(AppError::Validation("top_k must be a positive integer".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(AppError::Validation("embed_batch_size must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Validation("request_timeout_secs must be positive".into()));
        }
        if !self.similarity_floor.is_finite() {
            return Err(AppError::Validation("similarity_floor must be a finite number".into()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(AppError::Validation("embedding_model is empty".into()));
        }
        url::Url::parse(&self.ollama_url)
            .map_err(|e| AppError::Validation(format!("Invalid ollama_url '{}': {e}", self.ollama_url)))?;
        self.chunking.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retrieval(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k,
            similarity_floor: self.similarity_floor,
            request_timeout: self.request_timeout(),
        }
    }
}
