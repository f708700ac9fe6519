use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

use lexicon_sync::client::{CacheConfig, CacheManager, FileStorage, StatusHub};
use lexicon_sync::content::{Character, Collection, Entry, Record, Word};
use lexicon_sync::storage::{self, BackendKind, ContentStore};
use lexicon_sync::sync::spawn_listener;
use lexicon_sync::{server, ContentClient, RetryPolicy, SyncCoordinator};

#[derive(Parser)]
#[command(name = "lexicon")]
#[command(about = "Versioned dictionary content server with a caching, offline tolerant client", version)]
#[command(after_help = "Lexicon Features:
- Versioned content snapshot stored in a local file or a remote repository
- Live change notifications over server-sent events
- Local cache with expiry, schema versioning and size limits
- Offline reads served from cache when the server is unreachable")]
struct Cli {
    /// Content server used by client commands
    #[arg(long, global = true, env = "LEXICON_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Directory holding the local cache
    #[arg(long, global = true, env = "LEXICON_CACHE_DIR", default_value = ".lexicon/cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the content server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Where the snapshot is stored
        #[arg(short, long, value_enum, default_value = "auto")]
        backend: BackendKind,

        /// Snapshot file for the file backend
        #[arg(short, long, default_value = storage::DEFAULT_DATA_FILE)]
        data: PathBuf,
    },

    /// List a collection
    List {
        /// words or characters
        collection: Collection,
    },

    /// Search a collection
    Search {
        collection: Collection,
        query: String,
    },

    /// Follow live changes
    Watch,

    /// Inspect or manage the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts and timestamps
    Stats,

    /// Remove every cached entry
    Clear,

    /// Write cached entries to a JSON file
    Export { file: PathBuf },

    /// Load cached entries from a JSON file
    Import { file: PathBuf },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexicon_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            backend,
            data,
        } => {
            println!(
                "{}",
                format!("🌐 Starting content server on port {}...", port)
                    .cyan()
                    .bold()
            );
            let backend = storage::open_backend(backend, data)?;
            server::start(&host, port, ContentStore::new(backend)).await?;
        }

        Commands::List { collection } => {
            let client = open_client(&cli.server, &cli.cache_dir)?;
            match collection {
                Collection::Words => print_entries(&client.list::<Word>().await?),
                Collection::Characters => print_entries(&client.list::<Character>().await?),
            }
            report_status(&client);
        }

        Commands::Search { collection, query } => {
            let client = open_client(&cli.server, &cli.cache_dir)?;
            match collection {
                Collection::Words => print_entries(&client.search::<Word>(&query).await?),
                Collection::Characters => {
                    print_entries(&client.search::<Character>(&query).await?)
                }
            }
            report_status(&client);
        }

        Commands::Watch => {
            let client = Arc::new(open_client(&cli.server, &cli.cache_dir)?);
            let snapshot = client.snapshot().await?;
            println!(
                "{} Watching {} (version {})",
                "👁".cyan(),
                cli.server.bright_blue(),
                snapshot.version.to_string().bright_yellow()
            );

            let (_subscription, mut events) = spawn_listener(client.clone(), RetryPolicy::default());
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        println!(
                            "{} v{} {} {} {}",
                            "•".green(),
                            event.version,
                            event.collection.to_string().bright_white(),
                            format!("{:?}", event.action).to_lowercase().yellow(),
                            event.id.dimmed()
                        );
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }

        Commands::Cache { action } => {
            let cache = open_cache(&cli.cache_dir)?;
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats()?;
                    println!("{}", "Local cache".cyan().bold());
                    println!("  entries:      {}", stats.entries);
                    println!("  bytes:        {}", stats.bytes);
                    println!("  oldest:       {}", format_ms(stats.oldest));
                    println!("  newest:       {}", format_ms(stats.newest));
                    println!("  last cleanup: {}", format_ms(stats.last_cleanup));
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("{} Removed {} cached entries", "✓".green(), removed);
                }
                CacheAction::Export { file } => {
                    let entries = cache.export()?;
                    let json = serde_json::to_string_pretty(&entries)?;
                    tokio::fs::write(&file, json)
                        .await
                        .with_context(|| format!("writing {}", file.display()))?;
                    println!(
                        "{} Exported {} entries to {}",
                        "✓".green(),
                        entries.len(),
                        file.display()
                    );
                }
                CacheAction::Import { file } => {
                    let raw = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("reading {}", file.display()))?;
                    let imported = cache.import(&serde_json::from_str(&raw)?)?;
                    println!("{} Imported {} entries", "✓".green(), imported);
                }
            }
        }
    }

    Ok(())
}

fn open_cache(dir: &Path) -> Result<Arc<CacheManager>> {
    let storage = FileStorage::new(dir)
        .with_context(|| format!("opening cache directory {}", dir.display()))?;
    let cache = CacheManager::new(Arc::new(storage), CacheConfig::default());
    cache.cleanup()?;
    cache.optimize()?;
    Ok(Arc::new(cache))
}

fn open_client(server: &str, cache_dir: &Path) -> Result<ContentClient> {
    let coordinator = SyncCoordinator::new(StatusHub::new(), RetryPolicy::default());
    Ok(ContentClient::new(server, open_cache(cache_dir)?, coordinator)?)
}

fn print_entries<T: Record>(entries: &[Entry<T>]) {
    for entry in entries {
        println!("  {} {}", entry.data.label(), entry.id.dimmed());
    }
    println!("{} {} {}", "✓".green(), entries.len(), T::COLLECTION);
}

/// Mention when the data came from cache because the server failed
fn report_status(client: &ContentClient) {
    if let Some(error) = client.status().current().error {
        eprintln!("{} served from cache: {}", "⚠".yellow(), error);
    }
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}
