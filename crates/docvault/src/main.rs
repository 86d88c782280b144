//! # DocVault CLI (`dv`)
//!
//! ```bash
//! dv --config ./config/dv.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv init` | Create the SQLite database and storage directory |
//! | `dv user add <id> --role <role>` | Register a principal |
//! | `dv upload <file>... --owner <id>` | Store files and run the ingestion pipeline |
//! | `dv status <id>` | Document status and latest step history |
//! | `dv retry <id>` | Re-run the pipeline for a failed document |
//! | `dv search "<query>" --as <id>` | Scoped hybrid search |
//! | `dv context "<message>" --as <id>` | Show the allocated chat prompt |
//! | `dv ask "<message>" --as <id>` | Answer from retrieved context and verify grounding |
//!
//! Logs go to stderr and are filtered by `DV_LOG` (default `info`).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docvault::progress::ProgressMode;
use docvault::{chat_cmd, config, doc_cmd, migrate, search, user_cmd};

/// DocVault: ingest documents, search them within access scope, and build
/// grounded chat context.
#[derive(Parser)]
#[command(name = "dv", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage principals.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Upload files and run the ingestion pipeline on each.
    Upload {
        /// Files to upload. Pipelines run in parallel.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Owning principal.
        #[arg(long)]
        owner: String,

        /// public, internal, restricted, or top_secret.
        #[arg(long, default_value = "internal")]
        classification: String,

        /// Display title (single file only).
        #[arg(long)]
        title: Option<String>,

        /// Caller-facing id (single file only). Defaults to a UUID.
        #[arg(long)]
        external_id: Option<String>,

        /// Progress output on stderr. Defaults to human on a TTY, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show a document's status and step history.
    Status {
        /// Document id or external id.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Re-run the pipeline for a document in `failed`.
    Retry {
        /// Document id or external id.
        id: String,

        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Search documents visible to a principal.
    Search {
        query: String,

        /// Principal to search as.
        #[arg(long = "as")]
        principal: String,

        /// Restrict to these document ids (repeatable).
        #[arg(long = "doc")]
        docs: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show the prompt `ask` would send, with tier accounting.
    Context {
        message: String,

        #[arg(long = "as")]
        principal: String,

        #[arg(long = "doc")]
        docs: Vec<String>,

        /// JSON file of prior turns.
        #[arg(long)]
        history: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Answer a question from retrieved context.
    Ask {
        message: String,

        #[arg(long = "as")]
        principal: String,

        #[arg(long = "doc")]
        docs: Vec<String>,

        #[arg(long)]
        history: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Add or update a principal.
    Add {
        id: String,

        /// viewer, analyst, manager, or admin.
        #[arg(long)]
        role: String,

        /// Direct manager's id.
        #[arg(long)]
        manager: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

fn progress_mode(arg: Option<ProgressArg>) -> ProgressMode {
    match arg {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DV_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.dir)?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::User { action } => match action {
            UserAction::Add { id, role, manager } => {
                user_cmd::run_user_add(&cfg, &id, &role, manager).await?;
            }
        },
        Commands::Upload {
            paths,
            owner,
            classification,
            title,
            external_id,
            progress,
        } => {
            let args = doc_cmd::UploadArgs {
                paths,
                owner,
                classification,
                title,
                external_id,
                progress: progress_mode(progress),
            };
            doc_cmd::run_upload(&cfg, args).await?;
        }
        Commands::Status { id, json } => {
            doc_cmd::run_status(&cfg, &id, json).await?;
        }
        Commands::Retry { id, progress } => {
            doc_cmd::run_retry(&cfg, &id, progress_mode(progress)).await?;
        }
        Commands::Search {
            query,
            principal,
            docs,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, &principal, &docs, limit, json).await?;
        }
        Commands::Context {
            message,
            principal,
            docs,
            history,
            json,
        } => {
            let history = chat_cmd::load_history(history.as_deref())?;
            chat_cmd::run_context(&cfg, &message, &principal, &docs, &history, json).await?;
        }
        Commands::Ask {
            message,
            principal,
            docs,
            history,
            json,
        } => {
            let history = chat_cmd::load_history(history.as_deref())?;
            chat_cmd::run_ask(&cfg, &message, &principal, &docs, &history, json).await?;
        }
    }

    Ok(())
}
