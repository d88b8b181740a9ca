// ============================================
// BOOK LIBRARY
// One directory per book key under the output dir.
// Build into .tmp-<uuid>, publish by rename, reuse when valid.
// ============================================

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::epub::{read_book, BookInfo};
use crate::error::{AppError, AppResult};
use crate::providers::Embedder;
use crate::rag::{chunk_sections, ChunkPolicy, ChunkStore, VectorIndex};

pub const META_FILE: &str = "meta.json";
pub const FORMAT_VERSION: u32 = 1;

const LOCK_FILE: &str = ".lock";
const STAGING_PREFIX: &str = ".tmp-";
const BACKUP_PREFIX: &str = ".old-";
const MAX_STEM_CHARS: usize = 48;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub format_version: u32,
    pub book_key: String,
    pub book_file: String,
    pub info: BookInfo,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub chunking: ChunkPolicy,
    pub created_at: DateTime<Utc>,
}

/// A validated, published book directory.
#[derive(Debug)]
pub struct LoadedBook {
    pub key: String,
    pub dir: PathBuf,
    pub meta: IndexMeta,
    pub store: ChunkStore,
    pub index: VectorIndex,
    /// False when an existing index was reused.
    pub built: bool,
}

impl LoadedBook {
    pub fn info(&self) -> &BookInfo {
        &self.meta.info
    }

    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions<'a> {
    pub policy: &'a ChunkPolicy,
    pub batch_size: usize,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    /// `root` is created if missing.
    pub fn new(root: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            AppError::Io(format!("Failed to create output dir {}: {e}", root.display()))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn book_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Open a published book read-only under a shared lock.
    pub fn open(&self, key: &str) -> AppResult<LoadedBook> {
        let lock = self.lock_file()?;
        lock.lock_shared()
            .map_err(|e| AppError::Io(format!("Failed to acquire shared lock: {e}")))?;
        let loaded = load_dir(&self.book_dir(key), None);
        let _ = lock.unlock();
        loaded
    }

    /// Reuse the book's index when it is complete and was built with the
    /// same embedding model; otherwise (or with `force`) rebuild it.
    pub async fn open_or_build(
        &self,
        book_path: &Path,
        embedder: &dyn Embedder,
        options: BuildOptions<'_>,
    ) -> AppResult<LoadedBook> {
        let key = book_key(book_path)?;
        let dir = self.book_dir(&key);

        let lock = self.lock_file()?;
        lock.lock_exclusive()
            .map_err(|e| AppError::Io(format!("Failed to acquire build lock: {e}")))?;
        let result = self.open_or_build_locked(book_path, &key, &dir, embedder, options).await;
        let _ = lock.unlock();
        result
    }

    async fn open_or_build_locked(
        &self,
        book_path: &Path,
        key: &str,
        dir: &Path,
        embedder: &dyn Embedder,
        options: BuildOptions<'_>,
    ) -> AppResult<LoadedBook> {
        self.sweep_leftovers();

        if options.force {
            tracing::info!(key, "forced rebuild");
        } else if dir.join(META_FILE).exists() {
            match load_dir(dir, Some(embedder.model_name())) {
                Ok(book) => {
                    tracing::info!(key, chunks = book.chunk_count(), "reusing existing index");
                    return Ok(book);
                }
                Err(e) => tracing::warn!(key, error = %e, "existing index unusable, rebuilding"),
            }
        }

        let staging = self.root.join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));
        if let Err(e) = build_into(&staging, book_path, key, embedder, &options).await {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        self.publish(&staging, dir)?;

        let mut book = load_dir(dir, Some(embedder.model_name()))?;
        book.built = true;
        Ok(book)
    }

    /// Swap the staging directory into place with directory renames.
    fn publish(&self, staging: &Path, dir: &Path) -> AppResult<()> {
        let backup = self.root.join(format!("{BACKUP_PREFIX}{}", uuid::Uuid::new_v4()));
        let had_existing = dir.exists();
        if had_existing {
            std::fs::rename(dir, &backup).map_err(|e| {
                AppError::Io(format!("Failed to move old index aside: {e}"))
            })?;
        }
        if let Err(e) = std::fs::rename(staging, dir) {
            if had_existing {
                let _ = std::fs::rename(&backup, dir);
            }
            let _ = std::fs::remove_dir_all(staging);
            return Err(AppError::Io(format!("Failed to publish index: {e}")));
        }
        if had_existing {
            let _ = std::fs::remove_dir_all(&backup);
        }
        tracing::debug!(dir = %dir.display(), "index published");
        Ok(())
    }

    /// Remove staging/backup directories left by an interrupted build.
    /// Only called while holding the exclusive lock.
    fn sweep_leftovers(&self) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(STAGING_PREFIX) || name.starts_with(BACKUP_PREFIX)) {
                continue;
            }
            if entry.path().is_dir() {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => tracing::info!(dir = %name, "removed leftover build directory"),
                    Err(e) => tracing::warn!(dir = %name, error = %e, "could not remove leftover build directory"),
                }
            }
        }
    }

    fn lock_file(&self) -> AppResult<File> {
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))
            .map_err(|e| AppError::Io(format!("Failed to open lock file: {e}")))
    }
}

async fn build_into(
    staging: &Path,
    book_path: &Path,
    key: &str,
    embedder: &dyn Embedder,
    options: &BuildOptions<'_>,
) -> AppResult<()> {
    std::fs::create_dir_all(staging)
        .map_err(|e| AppError::Io(format!("Failed to create staging dir: {e}")))?;

    let book = read_book(book_path)?;
    let chunks = chunk_sections(&book.sections, options.policy)?;
    tracing::info!(key, chunks = chunks.len(), "book chunked");

    ChunkStore::write_all(staging, &chunks)?;
    let stats = VectorIndex::build(staging, &chunks, embedder, options.batch_size).await?;

    let meta = IndexMeta {
        format_version: FORMAT_VERSION,
        book_key: key.to_string(),
        book_file: book_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        info: book.info,
        embedding_model: embedder.model_name().to_string(),
        dimensions: stats.dimensions,
        chunk_count: chunks.len(),
        chunking: options.policy.clone(),
        created_at: Utc::now(),
    };

    // meta.json last: its presence marks the directory complete
    let meta_tmp = staging.join(format!("{META_FILE}.tmp"));
    std::fs::write(&meta_tmp, serde_json::to_string_pretty(&meta)?)
        .map_err(|e| AppError::Io(format!("Failed to write {META_FILE}: {e}")))?;
    std::fs::rename(&meta_tmp, staging.join(META_FILE))
        .map_err(|e| AppError::Io(format!("Failed to move {META_FILE}: {e}")))?;
    Ok(())
}

/// Load and cross-check every file of a book directory.
/// With `expected_model`, a different embedding model is a mismatch.
fn load_dir(dir: &Path, expected_model: Option<&str>) -> AppResult<LoadedBook> {
    let meta_path = dir.join(META_FILE);
    let content = std::fs::read_to_string(&meta_path)
        .map_err(|e| AppError::Io(format!("Failed to read {}: {e}", meta_path.display())))?;
    let meta: IndexMeta = serde_json::from_str(&content)?;

    if meta.format_version != FORMAT_VERSION {
        return Err(AppError::Io(format!(
            "index format {} is not supported (expected {FORMAT_VERSION})",
            meta.format_version
        )));
    }
    if let Some(model) = expected_model {
        if meta.embedding_model != model {
            return Err(AppError::Validation(format!(
                "index was built with embedding model '{}', not '{model}'",
                meta.embedding_model
            )));
        }
    }

    let store = ChunkStore::open(dir)?;
    store.verify()?;
    let index = VectorIndex::open(dir)?;

    if store.len() != meta.chunk_count || index.len() != meta.chunk_count {
        return Err(AppError::Io(format!(
            "chunk count mismatch: meta {}, store {}, index {}",
            meta.chunk_count,
            store.len(),
            index.len()
        )));
    }
    if index.dimensions() != meta.dimensions {
        return Err(AppError::Io(format!(
            "dimension mismatch: meta {}, index {}",
            meta.dimensions,
            index.dimensions()
        )));
    }

    Ok(LoadedBook {
        key: meta.book_key.clone(),
        dir: dir.to_path_buf(),
        meta,
        store,
        index,
        built: false,
    })
}

/// Sanitized file stem + first 16 hex chars of the SHA-256 of the file bytes.
pub fn book_key(path: &Path) -> AppResult<String> {
    let mut file = File::open(path)
        .map_err(|e| AppError::Io(format!("Failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| AppError::Io(format!("Failed to hash {}: {e}", path.display())))?;
    let digest = format!("{:x}", hasher.finalize());

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(format!("{}-{}", sanitize_stem(&stem), &digest[..16]))
}

fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "book".to_string()
    } else {
        trimmed.to_string()
    }
}
