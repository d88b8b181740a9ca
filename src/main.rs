use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use catch_me_up::config::{AppConfig, LocalModel};
use catch_me_up::epub::check_book_path;
use catch_me_up::library::{BuildOptions, Library};
use catch_me_up::menu::run_menu;
use catch_me_up::providers::{OllamaClient, OllamaEmbedder, OllamaGenerator};
use catch_me_up::session::Session;

const RULE: &str = "================================================================================";

#[derive(Parser, Debug)]
#[command(
    name = "catch-me-up",
    about = "Ask questions about an EPUB book and get caught up, using a local model",
    version
)]
struct Cli {
    /// Path to the EPUB book
    book: PathBuf,

    /// Local model used to answer
    #[arg(long, value_enum, env = "CATCH_ME_UP_MODEL")]
    model: Option<LocalModel>,

    /// Directory holding the per-book indexes
    #[arg(long, default_value = ".", env = "CATCH_ME_UP_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Number of passages retrieved per question
    #[arg(long, env = "CATCH_ME_UP_TOP_K", value_parser = clap::value_parser!(u64).range(1..))]
    top_k: Option<u64>,

    /// Ollama model used for embeddings
    #[arg(long, env = "CATCH_ME_UP_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Base URL of the Ollama server
    #[arg(long, env = "CATCH_ME_UP_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Minimum similarity for a passage to be used as context
    #[arg(long, env = "CATCH_ME_UP_SIMILARITY_FLOOR")]
    similarity_floor: Option<f32>,

    /// Seconds to wait for the model before giving up
    #[arg(long, env = "CATCH_ME_UP_TIMEOUT_SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,

    /// Rebuild the index even if a valid one exists
    #[arg(long)]
    force: bool,

    /// TOML config file; flags override its values
    #[arg(long, env = "CATCH_ME_UP_CONFIG")]
    config: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = usize::try_from(top_k).context("--top-k is too large")?;
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.ollama_url = url.clone();
        }
        if let Some(floor) = self.similarity_floor {
            config.similarity_floor = floor;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    check_book_path(&cli.book)?;
    let config = cli.resolve_config()?;

    println!("{RULE}");
    println!("INITIALIZING CATCH ME UP SYSTEM");
    println!("{RULE}");
    println!("Book: {}", cli.book.display());
    println!("Model: {} ({})", config.model, config.model.description());
    println!("Embedding model: {}", config.embedding_model);
    println!("Output directory: {}", cli.output_dir.display());
    println!("Top-K retrieval: {}", config.top_k);

    let client = OllamaClient::new(&config.ollama_url)?;
    println!("Ollama server: {}", client.base_url());
    client
        .health_check(&[config.model.tag(), config.embedding_model.as_str()])
        .await
        .context("Startup health check failed")?;

    let embedder = Arc::new(OllamaEmbedder::new(
        client.clone(),
        config.embedding_model.clone(),
        config.request_timeout(),
    ));
    let generator = Arc::new(OllamaGenerator::new(client, config.model.tag()));

    let library = Library::new(&cli.output_dir)?;
    println!("\nPreparing index (first run on a book embeds every passage, this can take a while)...");
    let book = library
        .open_or_build(
            &cli.book,
            embedder.as_ref(),
            BuildOptions {
                policy: &config.chunking,
                batch_size: config.embed_batch_size,
                force: cli.force,
            },
        )
        .await
        .with_context(|| format!("Failed to index {}", cli.book.display()))?;

    println!(
        "{} \"{}\" by {}: {} passages (positions 0-{})",
        if book.built { "Indexed" } else { "Loaded" },
        book.info().title,
        book.info().author,
        book.chunk_count(),
        book.chunk_count().saturating_sub(1)
    );

    let session = Session::new(book, embedder, generator, config.retrieval())?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_menu(&session, &mut stdin.lock(), &mut stdout.lock()).await?;
    Ok(())
}
