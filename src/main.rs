use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use support_console::config::ConsoleConfig;
use support_console::import::{Importer, seed_default_canned};
use support_console::store::{Database, LibSqlBackend};
use support_console::support::{BroadcastNotifier, MessageService, console_routes};
use support_console::triage::{self, PriorityTier, samples::SAMPLE_MESSAGES};

/// Customer support console: message triage and a live agent dashboard.
#[derive(Parser, Debug)]
#[command(name = "support-console", version, about, long_about = None)]
struct Cli {
    /// Database file (overrides SUPPORT_CONSOLE_DB_PATH).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server.
    Serve {
        /// Bind address (overrides SUPPORT_CONSOLE_BIND).
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Apply pending schema migrations.
    Migrate,
    /// Import customer messages from CSV files.
    Import {
        /// Directory to scan (overrides SUPPORT_CONSOLE_IMPORT_DIR).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Only files whose name contains this (overrides SUPPORT_CONSOLE_IMPORT_FILTER).
        #[arg(long)]
        filter: Option<String>,
        /// Also seed the default canned messages.
        #[arg(long)]
        seed_canned: bool,
    },
    /// Insert the default canned messages.
    SeedCanned,
    /// Score messages with the priority classifier.
    Score {
        /// Texts to score.
        text: Vec<String>,
        /// Score the built-in sample messages.
        #[arg(long)]
        samples: bool,
        /// Print the keyword tiers.
        #[arg(long)]
        keywords: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConsoleConfig::from_env().context("Invalid configuration")?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    let _log_guard = init_tracing(config.log_dir.as_deref());

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            serve(config).await
        }
        Command::Migrate => {
            let db = open_db(&config).await?;
            db.run_migrations().await?;
            let version = db.schema_version().await?;
            eprintln!("Database at {} is at schema V{}", config.db_path.display(), version);
            Ok(())
        }
        Command::Import {
            dir,
            filter,
            seed_canned,
        } => {
            if let Some(dir) = dir {
                config.import_dir = dir;
            }
            if let Some(filter) = filter {
                config.import_filter = filter;
            }
            run_import(config, seed_canned).await
        }
        Command::SeedCanned => {
            let service = build_service(&config).await?;
            let added = seed_default_canned(&service).await?;
            eprintln!("Added {added} canned messages");
            Ok(())
        }
        Command::Score {
            text,
            samples,
            keywords,
        } => {
            print_scores(&text, samples, keywords);
            Ok(())
        }
    }
}

/// Log to stderr, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "support-console.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn open_db(config: &ConsoleConfig) -> anyhow::Result<LibSqlBackend> {
    LibSqlBackend::new_local(&config.db_path, config.busy_timeout)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))
}

/// Open the store, refuse to continue on a stale schema, and wire the service.
async fn build_service(config: &ConsoleConfig) -> anyhow::Result<MessageService> {
    let (service, _events) = build_service_with_events(config).await?;
    Ok(service)
}

async fn build_service_with_events(
    config: &ConsoleConfig,
) -> anyhow::Result<(MessageService, Arc<BroadcastNotifier>)> {
    let db = open_db(config).await?;
    db.ensure_schema_current().await?;

    let events = Arc::new(BroadcastNotifier::new(config.broadcast_capacity));
    let db: Arc<dyn Database> = Arc::new(db);
    let service = MessageService::new(db, events.clone());
    Ok((service, events))
}

async fn serve(config: ConsoleConfig) -> anyhow::Result<()> {
    let (service, events) = build_service_with_events(&config).await?;
    let app = console_routes(Arc::new(service), events);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    eprintln!("Support Console v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Dashboard API: http://{}/api/messages", config.bind);
    eprintln!("   Dashboard WS:  ws://{}/ws", config.bind);
    eprintln!("   Database:      {}", config.db_path.display());
    info!(bind = %config.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("Server error")?;
    Ok(())
}

async fn run_import(config: ConsoleConfig, seed_canned: bool) -> anyhow::Result<()> {
    let service = Arc::new(build_service(&config).await?);
    let importer = Importer::new(Arc::clone(&service), config.import_filter.clone());
    let report = importer.run(&config.import_dir).await?;

    for file in &report.files {
        match &file.error {
            Some(error) => eprintln!("  {}: FAILED ({error})", file.file),
            None => eprintln!(
                "  {}: {} rows, {} imported, {} duplicates, {} skipped, {} failed",
                file.file, file.rows, file.imported, file.duplicates, file.skipped, file.failed
            ),
        }
    }
    eprintln!(
        "Import completed: {} messages imported, {} duplicates, {} files failed",
        report.imported(),
        report.duplicates(),
        report.failed_files()
    );

    if seed_canned {
        let added = seed_default_canned(&service).await?;
        eprintln!("Added {added} canned messages");
    }
    Ok(())
}

fn print_scores(texts: &[String], samples: bool, keywords: bool) {
    let mut inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    if samples {
        inputs.extend_from_slice(SAMPLE_MESSAGES);
    }

    for (i, text) in inputs.iter().enumerate() {
        let classification = triage::classify(text);
        println!("Test {}:", i + 1);
        println!("  Message: \"{text}\"");
        println!(
            "  Priority: {} ({})",
            classification.priority,
            classification.label()
        );
        if classification.matches.is_empty() {
            println!("  Matched Keywords: None");
        } else {
            let matched: Vec<String> = classification
                .matches
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("  Matched Keywords: {}", matched.join(", "));
        }
        println!();
    }

    if keywords {
        for tier in PriorityTier::ALL {
            println!("{tier} (Priority {}):", tier.priority());
            println!("  {}", tier.keywords().join(", "));
        }
    }
}
