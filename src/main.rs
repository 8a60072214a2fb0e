//! # Marginalia CLI (`marg`)
//!
//! The `marg` binary turns highlight exports into incrementally maintained
//! outlines.
//!
//! ## Usage
//!
//! ```bash
//! marg --config ./config/marginalia.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `marg outline <input>` | Plan, reconcile, generate, and write the outline |
//! | `marg assemble` | Rebuild the outline files from the store only |
//! | `marg explain <input>` | Generate one explanation per highlight |
//! | `marg status` | Show store statistics |
//! | `marg export` | Dump the chunk store as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # See which chunks would be reused, replaced, or generated
//! marg outline ./books/capital.json --dry-run
//!
//! # Generate; only changed chunks hit the model
//! marg outline ./books/capital.json
//!
//! # Retry chunks that ended up as failure placeholders
//! marg outline ./books/capital.json --rerun-failed
//!
//! # Force one chunk to be regenerated
//! marg outline ./books/capital.json --regenerate 3-100-5-240
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use marginalia::batch::{self, ExplainOptions};
use marginalia::config;
use marginalia::export;
use marginalia::pipeline::{self, OutlineOptions};
use marginalia::progress::ProgressMode;
use marginalia::reconcile::Regenerate;
use marginalia::stats;

/// Marginalia CLI — incremental LLM outlines for reading highlights.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/marginalia.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "marg",
    about = "Marginalia — incremental LLM outlines for reading highlights",
    version,
    long_about = "Marginalia cuts a book's highlights into chapter-aligned chunks, generates an \
    outline section per chunk with an LLM, and caches the results so later runs only regenerate \
    the chunks whose boundaries moved."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/marginalia.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    /// Verbose logging (debug level). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Generate or update the outline for a highlight export.
    ///
    /// Plans chunks, reconciles them against the chunk store, generates
    /// only what changed, saves the store, and writes
    /// `<output>/<stem>_outline.md` and `<stem>_outline.html`.
    Outline {
        /// Highlight export (JSON).
        input: PathBuf,

        /// Show the plan and reconciliation without generating or saving.
        #[arg(long)]
        dry_run: bool,

        /// Regenerate chunks stored as failure placeholders.
        #[arg(long)]
        rerun_failed: bool,

        /// Regenerate the chunk with this identity (repeatable).
        #[arg(long = "regenerate", value_name = "IDENTITY")]
        regenerate: Vec<String>,

        /// Output directory (overrides `output.dir`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Rebuild the outline files from the chunk store without generating.
    Assemble {
        /// Highlight export used for the title and chapter names.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory (overrides `output.dir`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate a short explanation for every highlight.
    Explain {
        /// Highlight export (JSON).
        input: PathBuf,

        /// Retry explanations that previously failed.
        #[arg(long)]
        rerun_failed: bool,

        /// Show counts without generating or saving.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show chunk and explanation store statistics.
    Status,

    /// Export the chunk store as JSON (stdout unless `--output` is given).
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Outline {
            input,
            dry_run,
            rerun_failed,
            regenerate,
            output,
        } => {
            let options = OutlineOptions {
                dry_run,
                regenerate: Regenerate {
                    failed: rerun_failed,
                    identities: regenerate.into_iter().collect::<BTreeSet<_>>(),
                },
                output_dir: output,
            };
            pipeline::run_outline(&cfg, &input, &options, mode).await?;
        }
        Commands::Assemble { input, output } => {
            pipeline::run_assemble(&cfg, input.as_deref(), output).await?;
        }
        Commands::Explain {
            input,
            rerun_failed,
            dry_run,
        } => {
            let options = ExplainOptions {
                dry_run,
                rerun_failed,
            };
            batch::run_explain(&cfg, &input, options, mode).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
    }

    Ok(())
}
