use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::chunker::Chunk;
use crate::error::{AppError, AppResult};

pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const OFFSETS_FILE: &str = "offsets.bin";

/// Positional reader over `chunks.jsonl` + `offsets.bin`.
///
/// `offsets.bin` is an array of u64 LE byte offsets, one per line of
/// `chunks.jsonl`, so any chunk is one slice away.
#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    offsets: Vec<u64>,
    data: Vec<u8>,
}

impl ChunkStore {
    /// Persist the whole chunk sequence into `dir`.
    /// Files are written under `.tmp` names and renamed into place.
    pub fn write_all(dir: &Path, chunks: &[Chunk]) -> AppResult<()> {
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.position != i || chunk.id != i {
                return Err(AppError::Validation(format!(
                    "chunk sequence is not contiguous: entry {i} has id {} / position {}",
                    chunk.id, chunk.position
                )));
            }
        }

        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::Io(format!("Failed to create store dir {}: {e}", dir.display())))?;

        let chunks_tmp = dir.join(format!("{CHUNKS_FILE}.tmp"));
        let offsets_tmp = dir.join(format!("{OFFSETS_FILE}.tmp"));

        let mut chunks_file = BufWriter::new(
            File::create(&chunks_tmp)
                .map_err(|e| AppError::Io(format!("Failed to create {CHUNKS_FILE}: {e}")))?,
        );
        let mut offsets: Vec<u64> = Vec::with_capacity(chunks.len());
        let mut byte_pos: u64 = 0;

        for chunk in chunks {
            offsets.push(byte_pos);
            let mut line = serde_json::to_string(chunk)?;
            line.push('\n');
            chunks_file
                .write_all(line.as_bytes())
                .map_err(|e| AppError::Io(format!("Failed to write chunk {}: {e}", chunk.id)))?;
            byte_pos += line.len() as u64;
        }
        finish(chunks_file, CHUNKS_FILE)?;

        let mut offsets_file = BufWriter::new(
            File::create(&offsets_tmp)
                .map_err(|e| AppError::Io(format!("Failed to create {OFFSETS_FILE}: {e}")))?,
        );
        for offset in &offsets {
            offsets_file
                .write_all(&offset.to_le_bytes())
                .map_err(|e| AppError::Io(format!("Failed to write offset: {e}")))?;
        }
        finish(offsets_file, OFFSETS_FILE)?;

        // offsets last: a reader seeing new offsets always sees the matching chunks
        std::fs::rename(&chunks_tmp, dir.join(CHUNKS_FILE))
            .map_err(|e| AppError::Io(format!("Failed to move {CHUNKS_FILE}: {e}")))?;
        std::fs::rename(&offsets_tmp, dir.join(OFFSETS_FILE))
            .map_err(|e| AppError::Io(format!("Failed to move {OFFSETS_FILE}: {e}")))?;

        tracing::debug!(chunks = chunks.len(), bytes = byte_pos, dir = %dir.display(), "chunk store written");
        Ok(())
    }

    pub fn open(dir: &Path) -> AppResult<Self> {
        let offsets_data = std::fs::read(dir.join(OFFSETS_FILE))
            .map_err(|e| AppError::Io(format!("Failed to read {OFFSETS_FILE}: {e}")))?;
        if offsets_data.len() % 8 != 0 {
            return Err(AppError::Io(format!(
                "{OFFSETS_FILE} is corrupt: length {} is not a multiple of 8",
                offsets_data.len()
            )));
        }
        let offsets = offsets_data
            .chunks_exact(8)
            .map(|raw| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                u64::from_le_bytes(bytes)
            })
            .collect();

        let data = std::fs::read(dir.join(CHUNKS_FILE))
            .map_err(|e| AppError::Io(format!("Failed to read {CHUNKS_FILE}: {e}")))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            offsets,
            data,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Read a single chunk by id (= position) via its offset.
    pub fn read_chunk(&self, id: usize) -> AppResult<Chunk> {
        if id >= self.offsets.len() {
            return Err(AppError::Range(format!(
                "chunk {id} out of range (store holds {})",
                self.offsets.len()
            )));
        }
        let line = self.line(id)?;
        Ok(serde_json::from_str(line)?)
    }

    /// Chunks with `start <= position <= end`, ascending. Out-of-bounds parts
    /// of the range are ignored.
    pub fn read_range(&self, start: usize, end: usize) -> AppResult<Vec<Chunk>> {
        if start > end || start >= self.len() {
            return Ok(Vec::new());
        }
        let last = end.min(self.len() - 1);
        (start..=last).map(|id| self.read_chunk(id)).collect()
    }

    /// Up to `n` chunks immediately preceding `position`, ascending.
    pub fn read_last_n_before(&self, position: usize, n: usize) -> AppResult<Vec<Chunk>> {
        let end = position.min(self.len());
        let start = end.saturating_sub(n);
        (start..end).map(|id| self.read_chunk(id)).collect()
    }

    pub fn read_all(&self) -> AppResult<Vec<Chunk>> {
        (0..self.len()).map(|id| self.read_chunk(id)).collect()
    }

    /// Full consistency check: offsets line up with newline-terminated
    /// records, every record parses, and positions are exactly `0..N-1`.
    pub fn verify(&self) -> AppResult<()> {
        let mut expected_offset = 0u64;
        for (i, &offset) in self.offsets.iter().enumerate() {
            if offset != expected_offset {
                return Err(AppError::Io(format!(
                    "{OFFSETS_FILE} is corrupt: entry {i} points at byte {offset}, expected {expected_offset}"
                )));
            }
            let line = self.line(i)?;
            let chunk: Chunk = serde_json::from_str(line)?;
            if chunk.id != i || chunk.position != i {
                return Err(AppError::Io(format!(
                    "{CHUNKS_FILE} line {i} has id {} / position {}",
                    chunk.id, chunk.position
                )));
            }
            expected_offset += line.len() as u64 + 1;
        }
        if expected_offset != self.data.len() as u64 {
            return Err(AppError::Io(format!(
                "{CHUNKS_FILE} has {} bytes but offsets cover {expected_offset}",
                self.data.len()
            )));
        }
        Ok(())
    }

    fn line(&self, id: usize) -> AppResult<&str> {
        let start = self.offsets[id] as usize;
        let end = match self.offsets.get(id + 1) {
            Some(&next) => next as usize,
            None => self.data.len(),
        };
        if start >= end || end > self.data.len() {
            return Err(AppError::Io(format!(
                "{OFFSETS_FILE} is corrupt: chunk {id} spans {start}..{end} of {} bytes",
                self.data.len()
            )));
        }
        let raw = &self.data[start..end];
        let Some(raw) = raw.strip_suffix(b"\n") else {
            return Err(AppError::Io(format!("{CHUNKS_FILE} record {id} is truncated")));
        };
        std::str::from_utf8(raw)
            .map_err(|e| AppError::Io(format!("Invalid UTF-8 in chunk {id}: {e}")))
    }
}

fn finish(mut writer: BufWriter<File>, name: &str) -> AppResult<()> {
    writer
        .flush()
        .map_err(|e| AppError::Io(format!("Failed to flush {name}: {e}")))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| AppError::Io(format!("Failed to sync {name}: {e}")))
}
