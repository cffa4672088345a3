//! # Helpdesk Triage CLI (`htriage`)
//!
//! ## Usage
//!
//! ```bash
//! htriage --config ./config/triage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `htriage init` | Create the SQLite database and schema |
//! | `htriage poll` | Run the poll worker until Ctrl-C |
//! | `htriage poll --once` | Run a single poll cycle |
//! | `htriage similar <id>` | Rank stored tickets similar to `<id>` |
//! | `htriage triage --subject ...` | Dry-run triage and print JSON |
//! | `htriage helpdesk departments` | List helpdesk departments |
//! | `htriage helpdesk create ...` | Create a helpdesk ticket |
//! | `htriage serve` | Start the operator HTTP API |
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to adjust
//! (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use helpdesk_triage::{config, desk_cmd, migrate, poller, server, similar, triage_cmd};

/// Helpdesk Triage: ticket classification and near-duplicate detection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/triage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "htriage",
    about = "Helpdesk ticket triage with near-duplicate detection",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/triage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Poll the helpdesk, triage active tickets and write results back.
    Poll {
        /// Run one cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// Find stored tickets similar to a given ticket.
    Similar {
        ticket_id: String,

        /// Number of results (default: similarity.top_k).
        #[arg(long)]
        k: Option<usize>,

        /// Candidate pool size for the index tier (default: similarity.num_candidates).
        #[arg(long)]
        candidates: Option<usize>,
    },

    /// Classify a ticket without touching the helpdesk or the database.
    Triage {
        #[arg(long)]
        subject: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        customer: Option<String>,
    },

    /// Direct helpdesk operations.
    Helpdesk {
        #[command(subcommand)]
        action: HelpdeskAction,
    },

    /// Start the operator HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum HelpdeskAction {
    /// List departments.
    Departments,

    /// Create a ticket.
    Create {
        #[arg(long)]
        subject: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Department id (default: first listed department).
        #[arg(long)]
        department_id: Option<String>,

        #[arg(long)]
        contact_id: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Poll { once } => {
            poller::run_poll(&cfg, once).await?;
        }
        Commands::Similar {
            ticket_id,
            k,
            candidates,
        } => {
            similar::run_similar(&cfg, &ticket_id, k, candidates).await?;
        }
        Commands::Triage {
            subject,
            description,
            customer,
        } => {
            triage_cmd::run_triage(&cfg, &subject, &description, customer).await?;
        }
        Commands::Helpdesk { action } => match action {
            HelpdeskAction::Departments => {
                desk_cmd::run_departments(&cfg).await?;
            }
            HelpdeskAction::Create {
                subject,
                description,
                department_id,
                contact_id,
                email,
            } => {
                desk_cmd::run_create(&cfg, &subject, &description, department_id, contact_id, email)
                    .await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
