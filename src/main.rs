use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsync::config::Config;
use docsync::engine::KnowledgeBase;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Incremental document synchronization for a local vector knowledge base",
    version
)]
struct Cli {
    /// Path to the JSON configuration file.
    ///
    /// A template is written when the default `config.json` is missing.
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index in line with the document directory.
    ///
    /// Only new, modified and removed files touch the vector index.
    Sync {
        /// Wipe the index and ledger and ingest everything again.
        #[arg(long)]
        force: bool,
    },

    /// Search the knowledge base.
    Search {
        query: String,

        /// Number of nearest chunks to consider (defaults to `search_top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Inclusive distance cutoff (defaults to `max_distance`).
        #[arg(long)]
        max_distance: Option<f64>,
    },

    /// Show ledger and index totals.
    Stats,

    /// Check that the ledger and the vector index agree.
    Verify {
        /// First delete index entries that no ledger record owns.
        #[arg(long)]
        repair: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    let kb = KnowledgeBase::open(&config).context("failed to open knowledge base")?;

    match cli.command {
        Commands::Sync { force } => {
            info!("Synchronizing {}", kb.documents_dir().display());
            let report = kb.synchronize(force).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "total {}  new {}  changed {}  deleted {}  unchanged {}  unreadable {}  failed {}",
                    report.total,
                    report.new,
                    report.changed,
                    report.deleted,
                    report.unchanged,
                    report.unreadable,
                    report.failed
                );
                println!("ledger: {} files, {} chunks", report.files, report.chunks);
            }
        }
        Commands::Search {
            query,
            top_k,
            max_distance,
        } => {
            let k = top_k.unwrap_or(config.search_top_k);
            let max_distance = max_distance.unwrap_or(config.max_distance);
            let retrieval = kb.retrieve(&query, k, max_distance).await?;
            if cli.json {
                print_json(&retrieval)?;
            } else {
                println!("{retrieval}");
            }
        }
        Commands::Stats => {
            let stats = kb.stats().await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("files:         {}", stats.ledger.file_count);
                println!("chunks:        {}", stats.ledger.chunk_count);
                println!("index entries: {}", stats.index_entries);
            }
        }
        Commands::Verify { repair } => {
            if repair {
                let removed = kb.repair().await?;
                if !cli.json {
                    println!("removed {removed} untracked index entries");
                }
            }
            let consistency = kb.verify().await?;
            if cli.json {
                print_json(&consistency)?;
            } else if consistency.is_consistent() {
                println!("ledger and index are consistent");
            } else {
                for id in &consistency.missing_from_index {
                    println!("missing from index: {id}");
                }
                for id in &consistency.untracked_in_index {
                    println!("untracked in index: {id}");
                }
            }
            anyhow::ensure!(consistency.is_consistent(), "ledger and index disagree");
        }
    }

    Ok(())
}
