// ============================================
// INTERACTIVE MENU
// Generic over reader/writer so it can be driven from tests
// ============================================

use std::io::{BufRead, Write};

use crate::error::{AppError, AppResult};
use crate::rag::format_citations;
use crate::session::{AskOutcome, Session, Summary};

const RULE: &str = "================================================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Ask,
    SummarizeRange,
    SummarizeLastN,
    Exit,
}

impl Choice {
    fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Ask),
            "2" => Some(Self::SummarizeRange),
            "3" => Some(Self::SummarizeLastN),
            "4" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Run until the user picks Exit or input ends.
/// A failed action is reported and the menu is shown again. Only a failure
/// to read the choice itself or to write the report ends the loop.
pub async fn run_menu<R: BufRead, W: Write>(
    session: &Session,
    input: &mut R,
    out: &mut W,
) -> AppResult<()> {
    loop {
        print_menu(out)?;
        let Some(line) = read_line(input)? else {
            writeln!(out)?;
            return Ok(());
        };
        let Some(choice) = Choice::parse(&line) else {
            writeln!(out, "Invalid choice '{}'. Please enter 1, 2, 3 or 4.", line.trim())?;
            continue;
        };

        let result = match choice {
            Choice::Ask => ask(session, input, out).await,
            Choice::SummarizeRange => summarize_range(session, input, out).await,
            Choice::SummarizeLastN => summarize_last_n(session, input, out).await,
            Choice::Exit => {
                writeln!(out, "\nGoodbye!")?;
                return Ok(());
            }
        };

        match result {
            Ok(true) => {}
            // input ended mid-prompt
            Ok(false) => {
                writeln!(out)?;
                return Ok(());
            }
            Err(e) => {
                if !e.is_recoverable() {
                    tracing::error!(error = %e, "menu action failed");
                }
                report(out, &e)?;
            }
        }
    }
}

fn print_menu<W: Write>(out: &mut W) -> AppResult<()> {
    writeln!(out, "\n{RULE}")?;
    writeln!(out, "CATCH ME UP - Book Q&A System")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "\n1. Ask a question about the book")?;
    writeln!(out, "2. Summarize by position range (e.g., positions 5-10)")?;
    writeln!(out, "3. Summarize the last N positions before your current position")?;
    writeln!(out, "4. Exit")?;
    write!(out, "\nEnter your choice (1-4): ")?;
    out.flush()?;
    Ok(())
}

fn report<W: Write>(out: &mut W, error: &AppError) -> AppResult<()> {
    writeln!(out, "\nError: {error}")?;
    if let AppError::Timeout(_) = error {
        writeln!(out, "The model timed out. It may be too large for this machine,")?;
        writeln!(out, "or Ollama may be overloaded. Try a smaller model with --model qwen2.5:0.5b.")?;
    }
    Ok(())
}

fn read_line<R: BufRead>(input: &mut R) -> AppResult<Option<String>> {
    let mut line = String::new();
    let read = input.read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Ask until a non-negative integer is entered. `None` when input ends.
fn read_number<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
) -> AppResult<Option<usize>> {
    loop {
        write!(out, "{label}")?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match line.trim().parse::<usize>() {
            Ok(n) => return Ok(Some(n)),
            Err(_) => writeln!(out, "Invalid input '{}'. Please enter a whole number.", line.trim())?,
        }
    }
}

async fn ask<R: BufRead, W: Write>(session: &Session, input: &mut R, out: &mut W) -> AppResult<bool> {
    write!(out, "\nEnter your question: ")?;
    out.flush()?;
    let Some(question) = read_line(input)? else {
        return Ok(false);
    };

    writeln!(out, "\nSearching the book and asking {}...", session.generator_model())?;
    out.flush()?;
    match session.ask(&question).await? {
        AskOutcome::Answered(answer) => {
            writeln!(out, "\n{RULE}\nANSWER:\n{RULE}")?;
            writeln!(out, "{}", answer.text)?;
            writeln!(out, "\n{RULE}\nSOURCES:\n{RULE}")?;
            write!(out, "{}", format_citations(&answer.sources))?;
        }
        AskOutcome::InsufficientContext => {
            writeln!(
                out,
                "\nNo passage in the book scored above the similarity floor ({}).",
                session.settings().similarity_floor
            )?;
            writeln!(out, "Try rephrasing the question, or lower --similarity-floor.")?;
        }
    }
    Ok(true)
}

async fn summarize_range<R: BufRead, W: Write>(
    session: &Session,
    input: &mut R,
    out: &mut W,
) -> AppResult<bool> {
    writeln!(out, "\nThe book has positions 0-{}.", session.chunk_count().saturating_sub(1))?;
    let Some(start) = read_number(input, out, "Enter start position: ")? else {
        return Ok(false);
    };
    let Some(end) = read_number(input, out, "Enter end position: ")? else {
        return Ok(false);
    };

    writeln!(out, "\nGenerating summary...")?;
    out.flush()?;
    let summary = session.summarize_range(start, end).await?;
    print_summary(out, &summary)?;
    Ok(true)
}

async fn summarize_last_n<R: BufRead, W: Write>(
    session: &Session,
    input: &mut R,
    out: &mut W,
) -> AppResult<bool> {
    let Some(position) = read_number(input, out, "\nEnter current position: ")? else {
        return Ok(false);
    };
    let Some(n) = read_number(input, out, "How many positions before this one to summarize? ")? else {
        return Ok(false);
    };

    writeln!(out, "\nGenerating summary...")?;
    out.flush()?;
    let summary = session.summarize_last_n(position, n).await?;
    print_summary(out, &summary)?;
    Ok(true)
}

fn print_summary<W: Write>(out: &mut W, summary: &Summary) -> AppResult<()> {
    writeln!(
        out,
        "\n{RULE}\nSUMMARY (Positions {}-{}, {} passages):\n{RULE}",
        summary.first_position, summary.last_position, summary.chunk_count
    )?;
    if !summary.chapters.is_empty() {
        writeln!(out, "Chapters: {}\n", summary.chapters.join(", "))?;
    }
    writeln!(out, "{}", summary.text)?;
    Ok(())
}
