// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// Headless line-oriented driver for the conduit session engine.
///
/// Creates one session against the configured backend (`CONDUIT_BACKEND`,
/// see `conduit-config`), then reads newline-delimited input from stdin and
/// writes every [`conduit_supervisor::PresentationEvent`] as a JSON line to
/// stdout. Stands in for the GUI's RPC boundary described in the session
/// engine's wire contract.
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about)]
pub struct Cli {
    /// Working directory for the session's tools / the ACP agent subprocess.
    #[arg(long, default_value = ".")]
    pub cwd: PathBuf,

    /// Display name for the initial session.
    #[arg(long, default_value = "session")]
    pub name: String,

    /// Send this prompt, print the resulting events, and exit instead of
    /// reading further input from stdin.
    #[arg(long)]
    pub prompt: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print shell completions for this CLI and exit.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
