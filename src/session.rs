use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::library::LoadedBook;
use crate::providers::{Embedder, Generator};
use crate::rag::{grounded_prompt, summary_prompt, Chunk, Citation, SearchFilter};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// A hit is used as context only if it scores strictly above this.
    pub similarity_floor: f32,
    pub request_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: crate::config::DEFAULT_TOP_K,
            similarity_floor: 0.0,
            request_timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Similarity order, best first.
    pub sources: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AskOutcome {
    Answered(Answer),
    /// No hit scored above the similarity floor; the model was not called.
    InsufficientContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub first_position: usize,
    pub last_position: usize,
    pub chunk_count: usize,
    pub chapters: Vec<String>,
}

/// Everything a query needs: the loaded book, the two services and the
/// retrieval settings. One interaction at a time.
pub struct Session {
    book: LoadedBook,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    settings: RetrievalSettings,
}

impl Session {
    pub fn new(
        book: LoadedBook,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: RetrievalSettings,
    ) -> AppResult<Self> {
        if settings.top_k == 0 {
            return Err(AppError::Validation("top_k must be a positive integer".into()));
        }
        if !settings.similarity_floor.is_finite() {
            return Err(AppError::Validation("similarity floor must be finite".into()));
        }
        Ok(Self {
            book,
            embedder,
            generator,
            settings,
        })
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn chunk_count(&self) -> usize {
        self.book.chunk_count()
    }

    pub fn generator_model(&self) -> &str {
        self.generator.model_name()
    }

    /// Retrieve, ground, generate.
    pub async fn ask(&self, question: &str) -> AppResult<AskOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question is empty".into()));
        }

        let filter = SearchFilter::default();
        let search = self
            .book
            .index
            .search(self.embedder.as_ref(), question, self.settings.top_k, &filter);
        let hits = tokio::time::timeout(self.settings.request_timeout, search)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "embedding the question took longer than {}s",
                    self.settings.request_timeout.as_secs()
                ))
            })??;

        let floor = self.settings.similarity_floor;
        let kept: Vec<_> = hits.into_iter().filter(|h| h.score > floor).collect();
        tracing::info!(kept = kept.len(), floor, "retrieved context");
        if kept.is_empty() {
            return Ok(AskOutcome::InsufficientContext);
        }

        let mut context: Vec<Chunk> = Vec::with_capacity(kept.len());
        let mut sources = Vec::with_capacity(kept.len());
        for hit in &kept {
            let chunk = self.book.store.read_chunk(hit.entry.id)?;
            sources.push(Citation::new(&chunk, hit.score));
            context.push(chunk);
        }

        let prompt = grounded_prompt(question, &context);
        tracing::debug!(prompt_chars = prompt.len(), "prompt composed");
        let text = self.generate(&prompt).await?;
        Ok(AskOutcome::Answered(Answer { text, sources }))
    }

    /// Summarize chunks `start..=end`. The part of the range past the end of
    /// the book is ignored; a range entirely outside it is an error.
    pub async fn summarize_range(&self, start: usize, end: usize) -> AppResult<Summary> {
        if start > end {
            return Err(AppError::Range(format!(
                "start position {start} is after end position {end}"
            )));
        }
        let total = self.chunk_count();
        if start >= total {
            return Err(AppError::Range(format!(
                "positions {start}-{end} are outside the book (valid: 0-{})",
                total.saturating_sub(1)
            )));
        }
        let chunks = self.book.store.read_range(start, end)?;
        self.summarize(chunks).await
    }

    /// Summarize the `n` chunks immediately before `position`.
    pub async fn summarize_last_n(&self, position: usize, n: usize) -> AppResult<Summary> {
        if n == 0 {
            return Err(AppError::Validation("number of positions must be positive".into()));
        }
        let chunks = self.book.store.read_last_n_before(position, n)?;
        if chunks.is_empty() {
            return Err(AppError::Range(format!(
                "nothing precedes position {position}"
            )));
        }
        self.summarize(chunks).await
    }

    async fn summarize(&self, chunks: Vec<Chunk>) -> AppResult<Summary> {
        let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
            return Err(AppError::Range("no chunks selected".into()));
        };
        let first_position = first.position;
        let last_position = last.position;

        let mut chapters: Vec<String> = Vec::new();
        for chapter in chunks.iter().filter_map(|c| c.chapter.as_ref()) {
            if !chapters.contains(chapter) {
                chapters.push(chapter.clone());
            }
        }

        let prompt = summary_prompt(self.book.info(), &chunks);
        tracing::info!(first_position, last_position, chunks = chunks.len(), "summarizing");
        let text = self.generate(&prompt).await?;
        Ok(Summary {
            text,
            first_position,
            last_position,
            chunk_count: chunks.len(),
            chapters,
        })
    }

    async fn generate(&self, prompt: &str) -> AppResult<String> {
        let timeout = self.settings.request_timeout;
        tokio::time::timeout(timeout, self.generator.generate(prompt, timeout))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "model '{}' did not answer within {}s",
                    self.generator.model_name(),
                    timeout.as_secs()
                ))
            })?
    }
}
