use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A paragraph-level unit of book text, addressable by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub position: usize,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
}

/// One spine document as handed over by the EPUB reader.
#[derive(Debug, Clone)]
pub struct RawSection {
    pub source_file: String,
    pub chapter_label: Option<String>,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    /// Units with fewer words are dropped.
    pub min_words: usize,
    /// Units shorter than this (in chars) are merged into a neighbour. 0 disables merging.
    pub merge_below_chars: usize,
    /// Units longer than this (in chars) are split at sentence boundaries.
    pub max_chars: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            min_words: 2,
            merge_below_chars: 40,
            max_chars: 2000,
        }
    }
}

impl ChunkPolicy {
    pub fn validate(&self) -> AppResult<()> {
        if self.max_chars < 50 {
            return Err(AppError::Validation(format!(
                "chunking.max_chars must be at least 50 (got {})",
                self.max_chars
            )));
        }
        if self.merge_below_chars >= self.max_chars {
            return Err(AppError::Validation(format!(
                "chunking.merge_below_chars ({}) must be smaller than max_chars ({})",
                self.merge_below_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
const LEAF_BLOCK_TAGS: &[&str] = &["p", "pre", "dt", "dd", "td", "th", "caption"];
const CONTAINER_BLOCK_TAGS: &[&str] = &["li", "blockquote", "figcaption", "aside"];
const SKIPPED_TAGS: &[&str] = &["head", "script", "style", "noscript", "svg", "math"];

#[derive(Debug, PartialEq)]
enum Unit {
    Heading { level: u8, text: String },
    Text(String),
}

/// A unit that survived filtering but has no position yet.
#[derive(Debug, Clone)]
struct Draft {
    text: String,
    chapter: Option<String>,
    section: Option<String>,
    source_file: String,
}

impl Draft {
    fn same_scope(&self, other: &Draft) -> bool {
        self.source_file == other.source_file
            && self.chapter == other.chapter
            && self.section == other.section
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Collapses whitespace and strips bracketed editorial artifacts like `[12]`.
struct TextCleaner {
    brackets: Regex,
}

impl TextCleaner {
    fn new() -> AppResult<Self> {
        let brackets = Regex::new(r"\[[^\]]*\]")
            .map_err(|e| AppError::Internal(format!("Invalid cleaning pattern: {e}")))?;
        Ok(Self { brackets })
    }

    fn clean(&self, text: &str) -> String {
        let collapsed = collapse_whitespace(text);
        let stripped = self.brackets.replace_all(&collapsed, "");
        collapse_whitespace(&stripped)
    }
}

/// Whitespace-separated words; each CJK character counts as a word.
fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| match word.chars().filter(|c| is_cjk(*c)).count() {
            0 => 1,
            cjk => cjk,
        })
        .sum()
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF
    )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turn the book's raw sections into chunks with contiguous positions from 0.
///
/// Fails with `Parse` when no section yields any text, so a broken book never
/// produces a partial chunk sequence.
pub fn chunk_sections(sections: &[RawSection], policy: &ChunkPolicy) -> AppResult<Vec<Chunk>> {
    policy.validate()?;
    let cleaner = TextCleaner::new()?;

    let mut drafts = Vec::new();
    for section in sections {
        collect_drafts(section, policy, &cleaner, &mut drafts);
    }

    let merged = merge_short(drafts, policy.merge_below_chars);

    let mut chunks = Vec::with_capacity(merged.len());
    for draft in merged {
        for text in split_oversized(&draft.text, policy.max_chars) {
            let position = chunks.len();
            chunks.push(Chunk {
                id: position,
                text,
                chapter: draft.chapter.clone(),
                section: draft.section.clone(),
                position,
                source_file: draft.source_file.clone(),
            });
        }
    }

    if chunks.is_empty() {
        return Err(AppError::Parse("book contains no extractable text".into()));
    }
    Ok(chunks)
}

fn collect_drafts(
    section: &RawSection,
    policy: &ChunkPolicy,
    cleaner: &TextCleaner,
    drafts: &mut Vec<Draft>,
) {
    let mut chapter = section.chapter_label.clone();
    let mut sub_section: Option<String> = None;

    for unit in extract_units(&section.html) {
        match unit {
            Unit::Heading { level, text } => {
                let title = cleaner.clean(&text);
                if title.is_empty() {
                    continue;
                }
                if level == 1 {
                    chapter = Some(title);
                    sub_section = None;
                } else {
                    sub_section = Some(title);
                }
            }
            Unit::Text(text) => {
                let cleaned = cleaner.clean(&text);
                if word_count(&cleaned) < policy.min_words.max(1) {
                    continue;
                }
                drafts.push(Draft {
                    text: cleaned,
                    chapter: chapter.clone(),
                    section: sub_section.clone(),
                    source_file: section.source_file.clone(),
                });
            }
        }
    }
}

/// Split a raw block into headings and paragraph-level text units.
/// Markup is split at tag boundaries; plain text at blank lines.
fn extract_units(raw: &str) -> Vec<Unit> {
    if !raw.contains('<') {
        return split_blank_lines(raw).into_iter().map(Unit::Text).collect();
    }

    let document = Html::parse_document(raw);
    let mut units = Vec::new();
    walk_container(document.root_element(), &mut units);
    units
}

fn split_blank_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Walk an element that may hold blocks. Loose text directly inside it is
/// gathered into its own unit, flushed whenever a block child starts.
fn walk_container(element: ElementRef, units: &mut Vec<Unit>) {
    let mut loose = String::new();

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            loose.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let tag = child_el.value().name();

        if SKIPPED_TAGS.contains(&tag) {
            continue;
        }

        if let Some(level) = heading_level(tag) {
            flush_loose(&mut loose, units);
            units.push(Unit::Heading { level, text: element_text(child_el) });
        } else if LEAF_BLOCK_TAGS.contains(&tag) {
            flush_loose(&mut loose, units);
            units.push(Unit::Text(element_text(child_el)));
        } else if CONTAINER_BLOCK_TAGS.contains(&tag) {
            flush_loose(&mut loose, units);
            if contains_block(child_el) {
                walk_container(child_el, units);
            } else {
                units.push(Unit::Text(element_text(child_el)));
            }
        } else if tag == "br" {
            loose.push(' ');
        } else if contains_block(child_el) {
            flush_loose(&mut loose, units);
            walk_container(child_el, units);
        } else if is_inline(tag) {
            loose.push_str(&element_text(child_el));
        } else {
            // div/section without inner blocks: its own unit
            flush_loose(&mut loose, units);
            units.push(Unit::Text(element_text(child_el)));
        }
    }

    flush_loose(&mut loose, units);
}

fn flush_loose(loose: &mut String, units: &mut Vec<Unit>) {
    if !loose.trim().is_empty() {
        units.push(Unit::Text(std::mem::take(loose)));
    }
    loose.clear();
}

fn heading_level(tag: &str) -> Option<u8> {
    HEADING_TAGS
        .iter()
        .position(|h| *h == tag)
        .map(|idx| idx as u8 + 1)
}

fn is_inline(tag: &str) -> bool {
    matches!(
        tag,
        "a" | "span" | "em" | "i" | "strong" | "b" | "u" | "s" | "small" | "sup" | "sub"
            | "code" | "abbr" | "cite" | "q" | "mark" | "del" | "ins" | "kbd" | "var" | "time"
    )
}

fn contains_block(element: ElementRef) -> bool {
    element
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|el| {
            let tag = el.value().name();
            heading_level(tag).is_some()
                || LEAF_BLOCK_TAGS.contains(&tag)
                || CONTAINER_BLOCK_TAGS.contains(&tag)
                || matches!(tag, "div" | "section" | "article" | "ul" | "ol" | "table")
        })
}

fn element_text(element: ElementRef) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        if let Some(t) = node.value().as_text() {
            text.push_str(t);
        } else if node.value().as_element().is_some_and(|el| el.name() == "br") {
            text.push(' ');
        }
    }
    text
}

/// Fold units shorter than `threshold` into the following unit of the same
/// chapter/section. A short unit with no follower in scope joins the previous one.
fn merge_short(drafts: Vec<Draft>, threshold: usize) -> Vec<Draft> {
    if threshold == 0 {
        return drafts;
    }

    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
    let mut carry: Option<Draft> = None;

    for draft in drafts {
        let draft = match carry.take() {
            Some(short) if short.same_scope(&draft) => Draft {
                text: format!("{} {}", short.text, draft.text),
                ..draft
            },
            Some(short) => {
                append_or_push(&mut merged, short);
                draft
            }
            None => draft,
        };

        if draft.char_len() < threshold {
            carry = Some(draft);
        } else {
            merged.push(draft);
        }
    }

    if let Some(short) = carry {
        append_or_push(&mut merged, short);
    }
    merged
}

fn append_or_push(merged: &mut Vec<Draft>, short: Draft) {
    match merged.last_mut() {
        Some(last) if last.same_scope(&short) => {
            last.text.push(' ');
            last.text.push_str(&short.text);
        }
        _ => merged.push(short),
    }
}

/// Split text longer than `max_chars` at sentence boundaries, falling back to
/// word boundaries for sentences that are too long on their own.
fn split_oversized(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut boundaries = Vec::new();
    for (i, _) in text.char_indices() {
        if is_sentence_end(text, i) {
            // End byte is after the punctuation char
            let end = i + text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            boundaries.push(end);
        }
    }
    if boundaries.last().map_or(true, |&b| b < text.len()) {
        boundaries.push(text.len());
    }

    let mut pieces = Vec::new();
    for segment in pack_segments(text, &boundaries, max_chars) {
        if segment.chars().count() > max_chars {
            pieces.extend(split_words(&segment, max_chars));
        } else {
            pieces.push(segment);
        }
    }

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Greedily pack sentence segments into pieces of at most `max_chars` chars.
fn pack_segments(text: &str, boundaries: &[usize], max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for &boundary in boundaries {
        if boundary <= end {
            continue;
        }
        if end > start && text[start..boundary].chars().count() > max_chars {
            pieces.push(text[start..end].to_string());
            start = end;
        }
        end = boundary;
    }
    if end > start {
        pieces.push(text[start..end].to_string());
    }
    pieces
}

fn split_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if word_len > max_chars {
            let mut rest = word;
            while !rest.is_empty() {
                let head = truncate_chars(rest, max_chars);
                pieces.push(head.to_string());
                rest = &rest[head.len()..];
            }
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// UTF-8 safe truncation to N characters.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn is_sentence_end(text: &str, byte_pos: usize) -> bool {
    let bytes = text.as_bytes();
    if byte_pos >= bytes.len() {
        return false;
    }
    let c = bytes[byte_pos];
    if matches!(c, b'.' | b'!' | b'?') {
        // "U.S.", "J. R. R." and friends
        if c == b'.' && byte_pos >= 2 {
            let prev = bytes[byte_pos - 1];
            let prev2 = bytes[byte_pos - 2];
            if prev.is_ascii_uppercase() && (prev2 == b' ' || prev2 == b'.') {
                return false;
            }
        }
        let next_pos = byte_pos + 1;
        if next_pos >= bytes.len() {
            return true;
        }
        let next = bytes[next_pos];
        return next == b' ' || next == b'\n' || next == b'"' || next == b'\'';
    }
    // CJK sentence enders: 。！？ are 3-byte UTF-8 sequences
    if byte_pos + 2 < bytes.len() {
        let seq = &bytes[byte_pos..byte_pos + 3];
        if seq == [0xE3, 0x80, 0x82] || seq == [0xEF, 0xBC, 0x81] || seq == [0xEF, 0xBC, 0x9F] {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(file: &str, label: Option<&str>, html: &str) -> RawSection {
        RawSection {
            source_file: file.into(),
            chapter_label: label.map(String::from),
            html: html.into(),
        }
    }

    fn xhtml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body>{body}</body></html>"
        )
    }

    fn three_chapter_book() -> Vec<RawSection> {
        (1..=3)
            .map(|n| {
                section(
                    &format!("ch{n}.xhtml"),
                    None,
                    &xhtml(&format!(
                        "<h1>Chapter {n}</h1>\
                         <p>The first paragraph of chapter {n} sets the scene in some detail.</p>\
                         <p>The second paragraph of chapter {n} moves the story along nicely.</p>"
                    )),
                )
            })
            .collect()
    }

    #[test]
    fn test_three_chapters_two_paragraphs() {
        let chunks = chunk_sections(&three_chapter_book(), &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 6);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, i);
            assert_eq!(chunk.position, i);
            let expected = format!("Chapter {}", i / 2 + 1);
            assert_eq!(chunk.chapter.as_deref(), Some(expected.as_str()));
            assert_eq!(chunk.section, None);
        }
        assert!(chunks[0].text.starts_with("The first paragraph of chapter 1"));
        assert!(chunks[5].text.starts_with("The second paragraph of chapter 3"));
        assert_eq!(chunks[2].source_file, "ch2.xhtml");
    }

    #[test]
    fn test_label_used_without_h1() {
        let sections = vec![section(
            "intro.xhtml",
            Some("Introduction"),
            &xhtml("<p>An opening paragraph that has no heading of its own at all.</p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks[0].chapter.as_deref(), Some("Introduction"));
    }

    #[test]
    fn test_subheadings_set_section() {
        let sections = vec![section(
            "ch1.xhtml",
            None,
            &xhtml(
                "<h1>One</h1><p>Before any sub-heading appears in this chapter text.</p>\
                 <h2>Arrival</h2><p>Text that belongs to the arrival part of chapter one.</p>\
                 <h1>Two</h1><p>A new chapter starts and the section must be cleared.</p>",
            ),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].section, None);
        assert_eq!(chunks[1].section.as_deref(), Some("Arrival"));
        assert_eq!(chunks[1].chapter.as_deref(), Some("One"));
        assert_eq!(chunks[2].chapter.as_deref(), Some("Two"));
        assert_eq!(chunks[2].section, None);
    }

    #[test]
    fn test_empty_section_keeps_positions_contiguous() {
        let mut sections = three_chapter_book();
        sections.insert(1, section("blank.xhtml", Some("Blank"), &xhtml("<div><img src=\"x.png\"/></div>")));
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 6);
        let positions: Vec<usize> = chunks.iter().map(|c| c.position).collect();
        assert_eq!(positions, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_text_is_parse_error() {
        let sections = vec![section("cover.xhtml", None, &xhtml("<div><img src=\"cover.jpg\"/></div>"))];
        let err = chunk_sections(&sections, &ChunkPolicy::default()).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
        assert!(matches!(chunk_sections(&[], &ChunkPolicy::default()), Err(AppError::Parse(_))));
    }

    #[test]
    fn test_single_word_fragments_dropped() {
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>***</p><p>Fin</p><p>A real paragraph with plenty of words in it to keep.</p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("A real paragraph"));
    }

    #[test]
    fn test_short_unit_merges_forward() {
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>\"Who goes there?\"</p><p>The guard lowered his lantern and peered into the fog.</p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "\"Who goes there?\" The guard lowered his lantern and peered into the fog."
        );
    }

    #[test]
    fn test_trailing_short_unit_merges_backward() {
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>The guard lowered his lantern and peered into the fog.</p><p>Nobody answered.</p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with("fog. Nobody answered."));
    }

    #[test]
    fn test_short_unit_does_not_cross_sections() {
        let sections = vec![
            section("a.xhtml", Some("A"), &xhtml("<p>Short ending here.</p>")),
            section("b.xhtml", Some("B"), &xhtml("<p>A paragraph in another chapter that is long enough.</p>")),
        ];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chapter.as_deref(), Some("A"));
        assert_eq!(chunks[0].text, "Short ending here.");
    }

    #[test]
    fn test_merging_disabled() {
        let policy = ChunkPolicy { merge_below_chars: 0, ..ChunkPolicy::default() };
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>Short one.</p><p>Short two.</p>"),
        )];
        let chunks = chunk_sections(&sections, &policy).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_oversized_split_at_sentences() {
        let sentence = "This sentence is exactly long enough to matter here. ";
        let paragraph = sentence.repeat(10);
        let policy = ChunkPolicy { max_chars: 120, ..ChunkPolicy::default() };
        let sections = vec![section("ch.xhtml", None, &xhtml(&format!("<p>{paragraph}</p>")))];
        let chunks = chunk_sections(&sections, &policy).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 120, "chunk too long: {}", chunk.text.len());
            assert!(chunk.text.ends_with('.'));
        }
        let rejoined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined.join(" "), paragraph.trim());
    }

    #[test]
    fn test_giant_word_is_hard_split() {
        let policy = ChunkPolicy { max_chars: 60, merge_below_chars: 0, min_words: 1 };
        let text = format!("start {} end", "x".repeat(150));
        let pieces = split_oversized(&text, policy.max_chars);
        for piece in &pieces {
            assert!(piece.chars().count() <= 60);
        }
        assert_eq!(pieces.concat().replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn test_cleaning() {
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>  The   treaty[12] was signed\n\n in   Vienna [citation needed] that spring. </p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks[0].text, "The treaty was signed in Vienna that spring.");
    }

    #[test]
    fn test_plain_text_split_on_blank_lines() {
        let raw = "First paragraph line one\ncontinues on line two.\r\n\r\nSecond paragraph stands alone here, on its own line.\n\n\n";
        let units = extract_units(raw);
        assert_eq!(units.len(), 2);
        let sections = vec![section("plain.txt", Some("Plain"), raw)];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph line one continues on line two.");
    }

    #[test]
    fn test_scripts_and_head_ignored() {
        let html = xhtml("<script>var x = 'hidden words in script';</script><style>p { color: red; }</style><p>Only this visible paragraph should survive the walk.</p>");
        let units = extract_units(&html);
        assert_eq!(
            units,
            vec![Unit::Text("Only this visible paragraph should survive the walk.".into())]
        );
    }

    #[test]
    fn test_nested_blocks_not_duplicated() {
        let html = xhtml(
            "<ul><li><p>Item paragraph one with enough words.</p></li><li>Plain item two with words.</li></ul>\
             <blockquote><p>Quoted paragraph inside a blockquote element.</p></blockquote>",
        );
        let units = extract_units(&html);
        assert_eq!(units.len(), 3);
    }

    #[test]
    fn test_loose_div_text() {
        let html = xhtml("<div>Loose text with <em>inline</em> markup<br/>and a break.</div>");
        let units = extract_units(&html);
        assert_eq!(units.len(), 1);
        if let Unit::Text(text) = &units[0] {
            assert_eq!(collapse_whitespace(text), "Loose text with inline markup and a break.");
        }
    }

    #[test]
    fn test_cjk_sentence_split() {
        let text = "这是一个测试句子。".repeat(20);
        let pieces = split_oversized(&text, 50);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 50);
            assert!(piece.ends_with('。'));
        }
    }

    #[test]
    fn test_cjk_paragraph_kept() {
        let sections = vec![section(
            "ch.xhtml",
            None,
            &xhtml("<p>他们在河边找到了一座小镇，并在那里过夜。第二天早上继续赶路。</p>"),
        )];
        let chunks = chunk_sections(&sections, &ChunkPolicy::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(word_count("两个"), 2);
        assert_eq!(word_count("two words"), 2);
    }

    #[test]
    fn test_abbreviation_not_sentence_end() {
        let text = "He met J. Smith there.";
        let dot = text.find("J.").unwrap() + 1;
        assert!(!is_sentence_end(text, dot));
        assert!(is_sentence_end(text, text.len() - 1));
    }

    #[test]
    fn test_policy_validation() {
        assert!(ChunkPolicy::default().validate().is_ok());
        assert!(ChunkPolicy { max_chars: 10, ..ChunkPolicy::default() }.validate().is_err());
        assert!(ChunkPolicy { merge_below_chars: 3000, ..ChunkPolicy::default() }.validate().is_err());
    }

    #[test]
    fn test_chunk_serializes_camel_source() {
        let chunk = Chunk {
            id: 0,
            text: "t".into(),
            chapter: None,
            section: None,
            position: 0,
            source_file: "a.xhtml".into(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"sourceFile\":\"a.xhtml\""));
        assert!(json.contains("\"chapter\":null"));
    }
}
