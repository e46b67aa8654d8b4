use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use repartee::pipeline::{annotate_directory, AnnotateConfig, DEFAULT_MODEL};
use repartee::store::{
    build_analytics_markdown, build_release_debug_markdown, build_report, format_report,
    setup_database, SqliteStore,
};
use repartee::units::DEFAULT_MAX_ATTEMPTS;
use repartee::DEFAULT_OPENAI_BASE_URL;

const DEFAULT_DB_PATH: &str = "out/annotations.db";
const DEFAULT_INPUT_DIR: &str = "data/chunked_transcripts";

#[derive(Parser)]
#[command(name = "repartee")]
#[command(author, version, about = "Sales-call transcript annotation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop and recreate the annotation database schema
    Setup {
        /// Path to the SQLite database file
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },

    /// Annotate a range of conversation CSV files into the database
    Annotate {
        /// Path to the SQLite database file
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Directory with source conversation CSV files
        #[arg(long, default_value = DEFAULT_INPUT_DIR)]
        input_dir: PathBuf,

        /// 1-based inclusive start index in the sorted CSV list
        #[arg(long, default_value = "1")]
        from_idx: usize,

        /// 1-based inclusive end index in the sorted CSV list
        #[arg(long, default_value = "20")]
        to_idx: usize,

        /// Annotation model
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// OpenAI-compatible endpoint (defaults to OPENAI_BASE_URL)
        #[arg(long)]
        base_url: Option<String>,

        /// Model-call budget per unit per utterance block
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print aggregate quality metrics for an annotated database
    Report {
        /// Path to the SQLite database file
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },

    /// Write the analytics summary markdown
    Analytics {
        /// Path to the SQLite database file
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Output markdown path
        #[arg(long, default_value = "out/analytics_latest.md")]
        out: PathBuf,
    },

    /// Write the release-debug drill-down markdown
    DebugRelease {
        /// Path to the SQLite database file
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Output markdown path
        #[arg(long, default_value = "out/release_debug_latest.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { db } => {
            setup_logging(false);
            setup_database(&db)?;
            info!(db = ?db, "sqlite_setup_ok");
            Ok(())
        }
        Commands::Annotate {
            db,
            input_dir,
            from_idx,
            to_idx,
            model,
            base_url,
            max_attempts,
            verbose,
        } => {
            setup_logging(verbose);
            run_annotate(db, input_dir, from_idx, to_idx, model, base_url, max_attempts).await
        }
        Commands::Report { db } => {
            setup_logging(false);
            let store = SqliteStore::open(&db)?;
            let report = build_report(&store)?;
            print!("{}", format_report(&report));
            Ok(())
        }
        Commands::Analytics { db, out } => {
            setup_logging(false);
            let store = SqliteStore::open(&db)?;
            let report = build_report(&store)?;
            write_text_file(&out, &build_analytics_markdown(&report))?;
            info!(out = ?out, "analytics_ok");
            Ok(())
        }
        Commands::DebugRelease { db, out } => {
            setup_logging(false);
            let store = SqliteStore::open(&db)?;
            let report = build_report(&store)?;
            write_text_file(&out, &build_release_debug_markdown(&report))?;
            info!(out = ?out, "debug_release_ok");
            Ok(())
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn run_annotate(
    db: PathBuf,
    input_dir: PathBuf,
    from_idx: usize,
    to_idx: usize,
    model: String,
    base_url: Option<String>,
    max_attempts: u32,
) -> Result<()> {
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let base_url = base_url
        .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current utterance block");
            signal_cancel.cancel();
        }
    });

    let summary = annotate_directory(
        AnnotateConfig {
            db_path: db.clone(),
            input_dir,
            from_idx,
            to_idx,
            model,
            api_key,
            base_url,
            max_attempts,
        },
        cancel,
    )
    .await?;

    if summary.cancelled {
        warn!(db = ?db, utterance_blocks = summary.utterance_blocks, "annotate_interrupted");
    } else {
        info!(db = ?db, utterance_blocks = summary.utterance_blocks, "annotate_ok");
    }
    Ok(())
}

fn write_text_file(path: &std::path::Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {parent:?}"))?;
        }
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write output file: {path:?}"))
}
