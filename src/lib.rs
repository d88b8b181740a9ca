// ============================================
// CATCH ME UP
// Question answering over an EPUB with local retrieval + generation
// ============================================

pub mod config;
pub mod epub;
pub mod error;
pub mod library;
pub mod menu;
pub mod providers;
pub mod rag;
pub mod session;

pub use config::{AppConfig, LocalModel};
pub use error::{AppError, AppResult};
pub use library::{BuildOptions, Library, LoadedBook};
pub use session::{Answer, AskOutcome, RetrievalSettings, Session, Summary};
