use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::chunker::Chunk;
use crate::error::{AppError, AppResult};
use crate::providers::Embedder;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const ENTRIES_FILE: &str = "entries.jsonl";

const VECTORS_MAGIC: u32 = 0x52414756; // "RAGV"
const VECTORS_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Per-vector metadata, denormalized from the chunk so filtering needs no join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: usize,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub position: usize,
}

impl From<&Chunk> for IndexEntry {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id,
            chapter: chunk.chapter.clone(),
            section: chunk.section.clone(),
            position: chunk.position,
        }
    }
}

/// Restricts search candidates before ranking. Empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub chapter: Option<String>,
    pub section: Option<String>,
    /// Inclusive position bounds.
    pub positions: Option<(usize, usize)>,
}

impl SearchFilter {
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(chapter) = &self.chapter {
            if entry.chapter.as_ref() != Some(chapter) {
                return false;
            }
        }
        if let Some(section) = &self.section {
            if entry.section.as_ref() != Some(section) {
                return false;
            }
        }
        if let Some((start, end)) = self.positions {
            if entry.position < start || entry.position > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: IndexEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub dimensions: usize,
    pub count: usize,
}

/// L2 normalize a vector in-place. Zero vectors stay zero.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Dot product similarity. On pre-normalized vectors, this equals cosine similarity.
pub fn dot_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Heap entry where "greater" means "worse", so the max-heap top is the
/// candidate to evict: lower score first, then higher position.
#[derive(Debug)]
struct Candidate {
    score: f32,
    position: usize,
    row: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Read-only view over `vectors.bin` (memory-mapped) and `entries.jsonl`.
pub struct VectorIndex {
    dir: PathBuf,
    dims: usize,
    entries: Vec<IndexEntry>,
    vectors: memmap2::Mmap,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dir", &self.dir)
            .field("dims", &self.dims)
            .field("count", &self.entries.len())
            .finish()
    }
}

impl VectorIndex {
    /// Embed every chunk and write `vectors.bin` + `entries.jsonl` into `dir`.
    ///
    /// Nothing is renamed into place until every batch has been embedded and
    /// validated, so an embedding failure leaves `dir` untouched.
    pub async fn build(
        dir: &Path,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> AppResult<IndexStats> {
        if batch_size == 0 {
            return Err(AppError::Validation("embedding batch size must be positive".into()));
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        let total_batches = chunks.len().div_ceil(batch_size);
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(AppError::EmbeddingService(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            for (chunk, mut vector) in batch.iter().zip(embedded) {
                validate_vector(&vector, vectors.first().map(Vec::len), chunk.id)?;
                normalize(&mut vector);
                vectors.push(vector);
            }
            tracing::debug!(batch = batch_no + 1, of = total_batches, "embedded batch");
        }

        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        write_files(dir, chunks, &vectors, dims)?;
        tracing::info!(
            chunks = chunks.len(),
            dims,
            model = embedder.model_name(),
            "vector index built"
        );
        Ok(IndexStats {
            dimensions: dims,
            count: vectors.len(),
        })
    }

    /// Open and validate an index: header, file length and entry count must agree.
    pub fn open(dir: &Path) -> AppResult<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let file = File::open(&vectors_path)
            .map_err(|e| AppError::Io(format!("Failed to open {VECTORS_FILE}: {e}")))?;
        let file_len = file
            .metadata()
            .map_err(|e| AppError::Io(format!("Failed to stat {VECTORS_FILE}: {e}")))?
            .len() as usize;
        if file_len < HEADER_LEN {
            return Err(AppError::Io(format!("{VECTORS_FILE} too small (no header)")));
        }

        // SAFETY: the index directory is only ever replaced by a directory
        // rename, never modified in place, so the mapped file does not change
        // underneath us.
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .map(&file)
                .map_err(|e| AppError::Io(format!("Failed to mmap {VECTORS_FILE}: {e}")))?
        };

        let magic = read_u32(&mmap, 0);
        let version = read_u32(&mmap, 4);
        let dims = read_u32(&mmap, 8) as usize;
        let count = read_u32(&mmap, 12) as usize;

        if magic != VECTORS_MAGIC {
            return Err(AppError::Io(format!(
                "Invalid {VECTORS_FILE} magic: {magic:#X} (expected {VECTORS_MAGIC:#X})"
            )));
        }
        if version != VECTORS_VERSION {
            return Err(AppError::Io(format!("Unsupported {VECTORS_FILE} version: {version}")));
        }
        let expected_len = HEADER_LEN + dims * count * 4;
        if file_len != expected_len {
            return Err(AppError::Io(format!(
                "{VECTORS_FILE} size mismatch: got {file_len}, expected {expected_len} (dims={dims}, count={count})"
            )));
        }

        let entries = read_entries(&dir.join(ENTRIES_FILE))?;
        if entries.len() != count {
            return Err(AppError::Io(format!(
                "{ENTRIES_FILE} has {} entries but {VECTORS_FILE} holds {count} vectors",
                entries.len()
            )));
        }
        for (i, entry) in entries.iter().enumerate() {
            if entry.id != i || entry.position != i {
                return Err(AppError::Io(format!(
                    "{ENTRIES_FILE} line {i} has id {} / position {}",
                    entry.id, entry.position
                )));
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            dims,
            entries,
            vectors: mmap,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Embed `query` and rank the filtered candidates.
    pub async fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> AppResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(AppError::Validation("top_k must be a positive integer".into()));
        }
        let query_vector = embedder.embed(query).await?;
        self.search_vector(query_vector, top_k, filter)
    }

    /// Rank by dot product against a raw query vector (normalized here).
    /// Hits come back by descending score, ties broken by ascending position.
    pub fn search_vector(
        &self,
        mut query_vector: Vec<f32>,
        top_k: usize,
        filter: &SearchFilter,
    ) -> AppResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(AppError::Validation("top_k must be a positive integer".into()));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.dims {
            return Err(AppError::EmbeddingService(format!(
                "Query vector dimension mismatch: query has {}, index has {}",
                query_vector.len(),
                self.dims
            )));
        }
        normalize(&mut query_vector);

        let float_data = &self.vectors[HEADER_LEN..];
        let row_bytes = self.dims * 4;
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(top_k + 1);
        // mapped rows are not guaranteed f32-aligned; decode into one reused buffer
        let mut row_buf: Vec<f32> = Vec::with_capacity(self.dims);

        for (row, entry) in self.entries.iter().enumerate() {
            if !filter.matches(entry) {
                continue;
            }
            let offset = row * row_bytes;
            row_buf.clear();
            row_buf.extend(
                float_data[offset..offset + row_bytes]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
            let score = dot_similarity(&query_vector, &row_buf);

            if !score.is_finite() {
                continue;
            }

            heap.push(Candidate {
                score,
                position: entry.position,
                row,
            });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| SearchHit {
                entry: self.entries[c.row].clone(),
                score: c.score,
            })
            .collect())
    }
}

fn validate_vector(vector: &[f32], expected_dims: Option<usize>, chunk_id: usize) -> AppResult<()> {
    if vector.is_empty() {
        return Err(AppError::EmbeddingService(format!(
            "empty embedding for chunk {chunk_id}"
        )));
    }
    if let Some(dims) = expected_dims {
        if vector.len() != dims {
            return Err(AppError::EmbeddingService(format!(
                "inconsistent embedding dimensions: chunk {chunk_id} has {}, expected {dims}",
                vector.len()
            )));
        }
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::EmbeddingService(format!(
            "non-finite value in embedding for chunk {chunk_id}"
        )));
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_entries(path: &Path) -> AppResult<Vec<IndexEntry>> {
    let file = File::open(path)
        .map_err(|e| AppError::Io(format!("Failed to open {ENTRIES_FILE}: {e}")))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

/// vectors.bin: magic(u32) + version(u32) + dims(u32) + count(u32) + f32[] rows
fn write_files(dir: &Path, chunks: &[Chunk], vectors: &[Vec<f32>], dims: usize) -> AppResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::Io(format!("Failed to create index dir {}: {e}", dir.display())))?;

    let count = u32::try_from(vectors.len())
        .map_err(|_| AppError::Validation(format!("too many vectors: {}", vectors.len())))?;
    let dims_u32 = u32::try_from(dims)
        .map_err(|_| AppError::Validation(format!("too many dimensions: {dims}")))?;

    let vectors_tmp = dir.join(format!("{VECTORS_FILE}.tmp"));
    let mut out = BufWriter::new(
        File::create(&vectors_tmp)
            .map_err(|e| AppError::Io(format!("Failed to create {VECTORS_FILE}: {e}")))?,
    );
    out.write_all(&VECTORS_MAGIC.to_le_bytes())?;
    out.write_all(&VECTORS_VERSION.to_le_bytes())?;
    out.write_all(&dims_u32.to_le_bytes())?;
    out.write_all(&count.to_le_bytes())?;
    for vector in vectors {
        for &val in vector {
            out.write_all(&val.to_le_bytes())?;
        }
    }
    out.flush()?;
    out.get_ref().sync_all()?;

    let entries_tmp = dir.join(format!("{ENTRIES_FILE}.tmp"));
    let mut out = BufWriter::new(
        File::create(&entries_tmp)
            .map_err(|e| AppError::Io(format!("Failed to create {ENTRIES_FILE}: {e}")))?,
    );
    for chunk in chunks {
        serde_json::to_writer(&mut out, &IndexEntry::from(chunk))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    out.get_ref().sync_all()?;

    std::fs::rename(&entries_tmp, dir.join(ENTRIES_FILE))
        .map_err(|e| AppError::Io(format!("Failed to move {ENTRIES_FILE}: {e}")))?;
    std::fs::rename(&vectors_tmp, dir.join(VECTORS_FILE))
        .map_err(|e| AppError::Io(format!("Failed to move {VECTORS_FILE}: {e}")))?;
    Ok(())
}
