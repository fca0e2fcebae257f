//! Command line interface built on clap.
//!
//! Global flags (`--config`, `--verbose`) apply to every subcommand; the
//! `run` overrides take precedence over `cellsmith.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use cellsmith::backend::BackendKind;

/// Cellsmith: batch AI transformations over spreadsheet ranges.
#[derive(Debug, Parser)]
#[command(name = "cellsmith", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a TOML config file (defaults to ./cellsmith.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    /// Remote completion service.
    Hosted,
    /// Local inference server.
    Local,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Hosted => BackendKind::Hosted,
            BackendArg::Local => BackendKind::Local,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transforms every cell of a range and writes the results back.
    Run {
        /// Sheet file (JSON with `headers` and `rows`).
        #[arg(long)]
        sheet: PathBuf,

        /// Cell range such as A1:B5.
        #[arg(long)]
        range: String,

        /// Name of a registered template.
        #[arg(long, conflicts_with = "prompt", required_unless_present = "prompt")]
        template: Option<String>,

        /// Ad-hoc template body, e.g. "Translate to French: {value}".
        #[arg(long)]
        prompt: Option<String>,

        /// Extra template variable as NAME=VALUE. Repeatable.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Where to write the updated sheet (defaults to overwriting --sheet).
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        backend: Option<BackendArg>,

        #[arg(long)]
        model: Option<String>,

        /// Worker count for this job.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Attempts per cell before giving up.
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Lists the registered templates.
    Templates,

    /// Sends a short prompt to confirm the configured backend answers.
    Check,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}
