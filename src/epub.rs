// ============================================
// EPUB READER
// Container + metadata + spine walk, labelled by the TOC
// ============================================

use epub::doc::{EpubDoc, NavPoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::rag::RawSection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
}

impl BookInfo {
    pub const UNKNOWN: &'static str = "Unknown";
}

impl Default for BookInfo {
    fn default() -> Self {
        Self {
            title: Self::UNKNOWN.to_string(),
            author: Self::UNKNOWN.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedBook {
    pub info: BookInfo,
    pub sections: Vec<RawSection>,
}

/// The book argument must name an existing `.epub` file.
pub fn check_book_path(path: &Path) -> AppResult<()> {
    let is_epub = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
    if !is_epub {
        return Err(AppError::Validation(format!(
            "{} is not an .epub file",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(AppError::Validation(format!(
            "Book not found: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Open the book and return its spine documents in reading order.
pub fn read_book(path: &Path) -> AppResult<ParsedBook> {
    let mut doc = EpubDoc::new(path)
        .map_err(|e| AppError::Parse(format!("Failed to open {}: {e}", path.display())))?;

    let info = BookInfo {
        title: metadata_value(&doc, "title"),
        author: metadata_value(&doc, "creator"),
    };

    let labels = toc_labels(&doc.toc);

    let mut sections = Vec::new();
    let num_pages = doc.get_num_pages();
    for i in 0..num_pages {
        if !doc.set_current_page(i) {
            tracing::warn!(index = i, "spine item could not be selected, skipping");
            continue;
        }
        let source_file = doc
            .get_current_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("spine-{i}"));

        let Some((html, _mime)) = doc.get_current_str() else {
            tracing::warn!(file = %source_file, "spine item is not readable text, skipping");
            continue;
        };

        let chapter_label = labels.get(source_file.as_str()).cloned();
        tracing::debug!(file = %source_file, label = ?chapter_label, bytes = html.len(), "spine document");
        sections.push(RawSection {
            source_file,
            chapter_label,
            html,
        });
    }

    if sections.is_empty() {
        return Err(AppError::Parse(format!(
            "{} has no readable documents in its spine",
            path.display()
        )));
    }

    tracing::info!(
        title = %info.title,
        author = %info.author,
        documents = sections.len(),
        "book opened"
    );
    Ok(ParsedBook { info, sections })
}

fn metadata_value<R: std::io::Read + std::io::Seek>(doc: &EpubDoc<R>, name: &str) -> String {
    doc.mdata(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| BookInfo::UNKNOWN.to_string())
}

/// Document path (fragment stripped) → TOC label. Depth-first, first match wins.
fn toc_labels(toc: &[NavPoint]) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    collect_labels(toc, &mut labels);
    labels
}

fn collect_labels(points: &[NavPoint], labels: &mut HashMap<String, String>) {
    for point in points {
        let content = point.content.to_string_lossy();
        let label = point.label.trim();
        if !label.is_empty() {
            labels
                .entry(strip_fragment(&content).to_string())
                .or_insert_with(|| label.to_string());
        }
        collect_labels(&point.children, labels);
    }
}

fn strip_fragment(content: &str) -> &str {
    content.split('#').next().unwrap_or(content)
}
