pub mod chunker;
pub mod index;
pub mod prompt;
pub mod store;

pub use chunker::{chunk_sections, Chunk, ChunkPolicy, RawSection};
pub use index::{dot_similarity, normalize, IndexEntry, IndexStats, SearchFilter, SearchHit, VectorIndex};
pub use prompt::{format_citations, grounded_prompt, summary_prompt, Citation};
pub use store::ChunkStore;
