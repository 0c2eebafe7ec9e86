//! # ragdoc CLI
//!
//! The `ragdoc` binary drives the document pipeline from the command line
//! and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! ragdoc --config ./config/ragdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdoc init` | Create the SQLite database and run schema migrations |
//! | `ragdoc upload <paths>...` | Validate and store files (directories are walked) |
//! | `ragdoc list` | Page through uploaded documents |
//! | `ragdoc parse --id 1 --hash <h>` | Extract, embed, and index documents |
//! | `ragdoc vectors <hash>...` | Show stored vector records |
//! | `ragdoc search "<text>"` | Nearest documents to a text |
//! | `ragdoc chat "<question>"` | Retrieval-augmented answer |
//! | `ragdoc serve` | Start the HTTP server |
//!
//! Every command prints the same JSON payload the HTTP API returns in `msg`.
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragdoc::app::App;
use ragdoc::config::{load_config, Config};
use ragdoc::ingest::{UploadFile, DEFAULT_PAGE_SIZE};
use ragdoc::{migrate, server};
use ragdoc_core::models::DocumentSelector;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// ragdoc: validate, index, and query uploaded documents.
#[derive(Parser)]
#[command(name = "ragdoc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload files. Directories are walked recursively.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List uploaded documents.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },

    /// Extract, embed, and index documents. Ids take precedence over hashes.
    Parse {
        #[arg(long = "id")]
        ids: Vec<i64>,
        #[arg(long = "hash")]
        hashes: Vec<String>,
    },

    /// Show stored vector records by content hash.
    Vectors {
        #[arg(required = true)]
        hashes: Vec<String>,
    },

    /// Find documents similar to a text.
    Search { text: String },

    /// Ask a question answered from indexed documents.
    Chat { question: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn collect_uploads(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    for root in paths {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            files.push(read_upload(entry.path())?);
        }
    }
    Ok(files)
}

fn read_upload(path: &Path) -> Result<UploadFile> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(UploadFile { file_name, data })
}

async fn open(config: Config) -> Result<App> {
    App::open(config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Upload { paths } => {
            let files = collect_uploads(&paths)?;
            let app = open(config).await?;
            print_json(&app.documents.upload_documents(files).await)?;
        }
        Commands::List { page, page_size } => {
            let app = open(config).await?;
            print_json(&app.documents.list_documents(page, page_size).await?)?;
        }
        Commands::Parse { ids, hashes } => {
            let selector = DocumentSelector::from_parts(ids, hashes)
                .context("pass at least one --id or --hash")?;
            let app = open(config).await?;
            print_json(&app.documents.parse_documents(&selector).await?)?;
        }
        Commands::Vectors { hashes } => {
            let app = open(config).await?;
            print_json(&app.documents.get_vectors(&hashes).await?)?;
        }
        Commands::Search { text } => {
            let app = open(config).await?;
            print_json(&app.documents.search_similar(&text).await?)?;
        }
        Commands::Chat { question } => {
            let app = open(config).await?;
            let answer = app.retrieval.answer(&question, &[]).await?;
            print_json(&serde_json::json!({ "answer": answer }))?;
        }
        Commands::Serve => {
            let app = open(config).await?;
            server::run_server(app).await?;
        }
    }

    Ok(())
}
