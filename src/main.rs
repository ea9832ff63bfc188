//! # magic-cli
//!
//! Command-line assistant for the shell: turns a natural-language request
//! into a command and searches shell history by meaning.
//!
//! ## Usage
//!
//! ```bash
//! magic-cli --config ./config.json <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `magic-cli suggest "<prompt>"` | Suggest one shell command for a request |
//! | `magic-cli search "<query>"` | Find similar commands in shell history |
//! | `magic-cli config get <key>` | Print a configuration value |
//! | `magic-cli config set --key <key> --value <v>` | Change a configuration value |
//! | `magic-cli config reset` | Restore every default |
//! | `magic-cli config list` | Show every key, value, and description |
//! | `magic-cli config path` | Print the configuration file path |
//! | `magic-cli sysinfo` | Show the host details sent with suggestions |
//! | `magic-cli completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Use OpenAI instead of a local Ollama server
//! magic-cli config set --key general.llm --value openai
//! magic-cli config set --key openai.api_key --value sk-...
//!
//! # Suggest a command and print only the command
//! magic-cli suggest "list all kubernetes pods" --output-only
//!
//! # Search history, rebuilding the index first
//! magic-cli search "resize images" --reset-index
//! ```
//!
//! Set `MAGIC_CLI_LOG=debug` to see what the pipelines decide.

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use magic_cli::config::{default_config_path, ConfigStore};
use magic_cli::{config_cmd, search, suggest};

/// magic-cli: shell command suggestions and semantic history search.
#[derive(Parser)]
#[command(
    name = "magic-cli",
    version,
    about = "Suggest shell commands from natural language and search shell history by meaning"
)]
struct Cli {
    /// Path to the configuration file (JSON).
    ///
    /// Defaults to `magic-cli/config.json` under the platform config
    /// directory. A missing file means all defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read or change configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Suggest a shell command for a natural-language request.
    Suggest {
        /// What the command should do.
        prompt: String,

        /// Print only the command, without prompts or formatting.
        #[arg(long)]
        output_only: bool,
    },

    /// Search shell history for commands similar to a query.
    ///
    /// New history lines are embedded first; only lines added since the
    /// last search cost provider calls.
    Search {
        /// Free-text description of the command you are looking for.
        query: String,

        /// Print only the matching commands, one per line.
        #[arg(long)]
        output_only: bool,

        /// Number of results (defaults to `search.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Delete the index and rebuild it from the whole history.
        #[arg(long)]
        reset_index: bool,
    },

    /// Show the OS, architecture, and shell that suggestions are tailored to.
    Sysinfo,

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the value of a key, e.g. `general.llm`.
    Get { key: String },

    /// Set a key to a value.
    Set {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },

    /// Reset every key to its default.
    Reset,

    /// List every key with its value and description.
    List,

    /// Print the path of the configuration file.
    Path,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MAGIC_CLI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "magic-cli", &mut std::io::stdout());
        return Ok(());
    }
    if let Commands::Sysinfo = cli.command {
        return suggest::run_sysinfo();
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()
            .context("Could not determine a configuration directory; pass --config")?,
    };

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => config_cmd::run_get(&config_path, &key)?,
            ConfigAction::Set { key, value } => config_cmd::run_set(&config_path, &key, &value)?,
            ConfigAction::Reset => config_cmd::run_reset(&config_path)?,
            ConfigAction::List => config_cmd::run_list(&config_path)?,
            ConfigAction::Path => config_cmd::run_path(&config_path)?,
        },
        Commands::Suggest {
            prompt,
            output_only,
        } => {
            let settings = load_settings(&config_path)?;
            suggest::run_suggest(&settings, &prompt, output_only).await?;
        }
        Commands::Search {
            query,
            output_only,
            limit,
            reset_index,
        } => {
            let settings = load_settings(&config_path)?;
            search::run_search(&settings, &query, output_only, limit, reset_index).await?;
        }
        Commands::Completions { .. } | Commands::Sysinfo => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn load_settings(path: &std::path::Path) -> anyhow::Result<magic_cli::config::Settings> {
    let store = ConfigStore::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok(store.settings()?)
}
