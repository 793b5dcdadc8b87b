//! # docforge CLI
//!
//! The `docforge` binary runs the HTTP server and exposes every server
//! operation as a local command.
//!
//! ## Usage
//!
//! ```bash
//! docforge --config ./config/docforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docforge init` | Write an example configuration file |
//! | `docforge serve` | Start the HTTP server |
//! | `docforge generate "<prompt>"` | Generate a docx from a prompt |
//! | `docforge run <script.lua> --out <file>` | Run a local Lua document script in the sandbox |
//! | `docforge export <page.html>` | Convert HTML into a stored docx |
//! | `docforge import <file.docx>` | Print a docx as editor HTML |
//! | `docforge refine <page.html> --instruction "<text>"` | Rewrite HTML with the model |
//! | `docforge cleanup` | Delete stored documents past the retention window |
//! | `docforge artifacts` | List stored documents |
//!
//! ## Examples
//!
//! ```bash
//! # Generate a memo, attaching meeting notes as context
//! docforge generate "a one-page memo summarising these notes" --attach notes.md --out memo.docx
//!
//! # Delete everything older than two hours
//! docforge cleanup --max-age-hours 2
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docforge::{commands, config, server};

/// docforge: turn natural-language prompts into Word documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file is missing, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "docforge",
    about = "docforge: generate Word documents from natural-language prompts",
    version,
    long_about = "docforge asks a language model to write a small Lua program that builds \
    a document, runs it in a sandbox, and stores the resulting .docx for download. It also \
    converts between editor HTML and .docx."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docforge.toml`.
    #[arg(long, global = true, default_value = "./config/docforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration to the `--config` path.
    Init,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves the generation API.
    Serve,

    /// Generate a document from a prompt.
    Generate {
        /// What the document should contain.
        prompt: String,

        /// Reference file (txt, md, pdf or docx) passed to the model as context.
        #[arg(long)]
        attach: Option<PathBuf>,

        /// Also copy the generated document to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run a local Lua document script in the generation sandbox.
    ///
    /// The script sees the same `docx`, `log` and `output_path` globals as
    /// generated code.
    Run {
        /// Path to the `.lua` script.
        script: PathBuf,

        /// Where to write the document the script saves.
        #[arg(long)]
        out: PathBuf,
    },

    /// Convert an HTML file into a stored docx.
    Export {
        /// Path to the HTML file.
        html: PathBuf,

        /// Also copy the document to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print a docx file as editor HTML.
    Import {
        /// Path to the `.docx` file.
        docx: PathBuf,
    },

    /// Rewrite an HTML file according to an instruction.
    Refine {
        /// Path to the HTML file.
        html: PathBuf,

        /// How the content should change.
        #[arg(long)]
        instruction: String,
    },

    /// Delete stored documents older than the given age.
    Cleanup {
        /// Maximum age in hours (defaults to `[storage].retention_hours`).
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// List stored documents, newest first.
    Artifacts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let path = commands::init_config(&cli.config)?;
        println!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        config::Config::minimal()
    };

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Generate {
            prompt,
            attach,
            out,
        } => {
            commands::run_generate(&cfg, &prompt, attach.as_deref(), out.as_deref()).await?;
        }
        Commands::Run { script, out } => {
            commands::run_script(&cfg, &script, &out).await?;
        }
        Commands::Export { html, out } => {
            commands::run_export(&cfg, &html, out.as_deref()).await?;
        }
        Commands::Import { docx } => {
            commands::run_import(&cfg, &docx)?;
        }
        Commands::Refine { html, instruction } => {
            commands::run_refine(&cfg, &html, &instruction).await?;
        }
        Commands::Cleanup { max_age_hours } => {
            commands::run_cleanup(&cfg, max_age_hours).await?;
        }
        Commands::Artifacts => {
            commands::run_artifacts(&cfg).await?;
        }
    }

    Ok(())
}
