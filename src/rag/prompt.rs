use serde::Serialize;
use std::collections::BTreeSet;

use super::chunker::Chunk;
use crate::epub::BookInfo;

const PREVIEW_CHARS: usize = 150;

/// One source line printed under an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub score: f32,
    pub position: usize,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub preview: String,
}

impl Citation {
    pub fn new(chunk: &Chunk, score: f32) -> Self {
        Self {
            score,
            position: chunk.position,
            chapter: chunk.chapter.clone(),
            section: chunk.section.clone(),
            preview: preview(&chunk.text),
        }
    }
}

/// First characters of a chunk, with an ellipsis when cut.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn chunks_by_position(chunks: &[Chunk]) -> Vec<&Chunk> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.position);
    ordered
}

fn location_tag(chunk: &Chunk) -> String {
    let mut tag = format!("[Position {}", chunk.position);
    if let Some(chapter) = &chunk.chapter {
        tag.push_str(&format!(", Chapter: {chapter}"));
    }
    if let Some(section) = &chunk.section {
        tag.push_str(&format!(", Section: {section}"));
    }
    tag.push(']');
    tag
}

/// Question prompt grounded in the retrieved chunks.
/// Chunks are presented in reading order regardless of their rank.
pub fn grounded_prompt(question: &str, context: &[Chunk]) -> String {
    let mut prompt = String::from(
        "You are a reading assistant. Answer the question using only the book excerpts below.\n\
         If the excerpts do not contain the answer, say that the book passages provided do not cover it.\n\
         Do not make up facts.\n\nExcerpts:\n",
    );

    for chunk in chunks_by_position(context) {
        prompt.push_str("\n---\n");
        prompt.push_str(&location_tag(chunk));
        prompt.push('\n');
        prompt.push_str(&chunk.text);
        prompt.push('\n');
    }

    prompt.push_str(&format!("\n---\n\nQuestion: {question}\n\nAnswer:"));
    prompt
}

/// Summary prompt for a contiguous stretch of the book.
pub fn summary_prompt(info: &BookInfo, chunks: &[Chunk]) -> String {
    let ordered = chunks_by_position(chunks);

    let book_context = if info.title == BookInfo::UNKNOWN {
        " this book".to_string()
    } else {
        format!(" the book \"{}\" by {}", info.title, info.author)
    };

    // Reading order, each chapter once
    let mut seen = BTreeSet::new();
    let chapters: Vec<&str> = ordered
        .iter()
        .filter_map(|c| c.chapter.as_deref())
        .filter(|c| seen.insert(*c))
        .collect();
    let chapter_info = if chapters.is_empty() {
        String::new()
    } else {
        format!(" from chapter(s): {}", chapters.join(", "))
    };

    let combined = ordered
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are summarizing a section of{book_context}{chapter_info}.\n\n\
         Provide a comprehensive but concise summary of the following text. Focus on:\n\
         - Main events or discoveries described\n\
         - Key concepts or ideas presented\n\
         - Important characters or entities mentioned\n\
         - The narrative flow and progression\n\n\
         Text to summarize:\n\n{combined}\n\nSummary:"
    )
}

/// Source listing in similarity order, as printed under an answer.
pub fn format_citations(citations: &[Citation]) -> String {
    let mut output = String::new();
    for (i, citation) in citations.iter().enumerate() {
        output.push_str(&format!("\nSource {}:\n", i + 1));
        output.push_str(&format!("  Score: {:.4}\n", citation.score));
        output.push_str(&format!(
            "  Chapter: {}\n",
            citation.chapter.as_deref().unwrap_or("Unknown")
        ));
        output.push_str(&format!(
            "  Section: {}\n",
            citation.section.as_deref().unwrap_or("N/A")
        ));
        output.push_str(&format!("  Position: {}\n", citation.position));
        output.push_str(&format!("  Preview: {}\n", citation.preview));
    }
    output
}
