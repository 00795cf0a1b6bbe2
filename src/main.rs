// SPDX-License-Identifier: MIT
mod cli;

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use conduit_config::Config;
use conduit_supervisor::{PresentationEvent, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        cli::print_completions(shell);
        return Ok(());
    }

    init_logging();

    let config = Arc::new(Config::from_env().context("loading configuration from the environment")?);
    let (presentation_tx, presentation_rx) = mpsc::channel(256);
    let (supervisor, question_rx) = Supervisor::new(config, presentation_tx).await.context("starting the ask-user MCP server")?;

    let print_task = tokio::spawn(print_presentation_events(presentation_rx));
    let question_task = tokio::spawn(print_user_questions(question_rx));

    supervisor.create_session(cli.name, &cli.cwd).await.context("creating the initial session")?;

    if let Some(prompt) = cli.prompt {
        if let Err(err) = supervisor.send_message(&prompt).await {
            eprintln!("error: {err}");
        }
    } else {
        run_stdin_loop(&supervisor).await;
    }

    // Close every session so its bridge task exits and releases its clone of
    // `supervisor`; only once every clone (bridge tasks plus this one) is
    // dropped does the presentation channel's sender actually close, letting
    // `print_task` finish instead of waiting on input forever.
    for session in supervisor.sessions() {
        supervisor.close_session(&session.id).await;
    }
    supervisor.shutdown_mcp();
    drop(supervisor);
    // Bounded: an SSE client the MCP server never finished tearing down must
    // not hang process exit.
    let drain = std::time::Duration::from_secs(2);
    let _ = tokio::time::timeout(drain, print_task).await;
    let _ = tokio::time::timeout(drain, question_task).await;
    Ok(())
}

/// `RUST_LOG` controls verbosity; defaults to `info` for this binary and
/// `warn` for its dependencies, matching the density the teacher applies to
/// its own headless entry points.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,conduit=debug"));
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();
}

async fn print_presentation_events(mut events: mpsc::Receiver<PresentationEvent>) {
    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let mut handle = stdout.lock();
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(handle, "{line}");
        }
    }
}

async fn print_user_questions(mut questions: mpsc::Receiver<conduit_mcp::UserQuestionRequest>) {
    let stdout = std::io::stdout();
    while let Some(request) = questions.recv().await {
        let event = PresentationEvent::UserQuestion {
            request_id: request.id,
            question: request.question,
            options: request.options,
        };
        let mut handle = stdout.lock();
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(handle, "{line}");
        }
    }
}

/// Reads newline-delimited commands from stdin until EOF. A bare line is
/// sent as a chat message to the active session; lines starting with `/`
/// dispatch the other supervisor inputs (§6.4).
async fn run_stdin_loop(supervisor: &Arc<Supervisor>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = if let Some(rest) = line.strip_prefix("/permission ") {
            supervisor.permission_response(rest.trim()).map(|_| String::new())
        } else if let Some(rest) = line.strip_prefix("/answer ") {
            match rest.trim().split_once(' ') {
                Some((id, answer)) => {
                    supervisor.user_answer(id, answer);
                    Ok(String::new())
                }
                None => {
                    eprintln!("usage: /answer <request-id> <answer text>");
                    continue;
                }
            }
        } else if let Some(rest) = line.strip_prefix("/switch ") {
            supervisor.switch_session(rest.trim()).await.map(|_| String::new())
        } else if line == "/cancel" {
            supervisor.cancel().await.map(|_| String::new())
        } else if line == "/review" {
            supervisor.submit_review(Vec::new()).await.map(|_| String::new())
        } else {
            supervisor.send_message(line).await
        };

        if let Err(err) = result {
            eprintln!("error: {err}");
        }
    }
}
