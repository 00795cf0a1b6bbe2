// SPDX-License-Identifier: MIT
//! Subprocess wiring: launches the external agent and connects its stdio to
//! a [`conduit_rpc::Transport`]. Kept separate from [`crate::session`] so the
//! protocol logic can be exercised against an in-process transport in tests.

use std::path::Path;
use std::process::Stdio;

use conduit_rpc::Transport;
use tokio::process::{Child, Command};

/// Spawns `command` with `args`, piping its stdin/stdout into a fresh
/// [`Transport`] and passing its stderr through to the host process's
/// stderr (§4.5 transport note).
pub fn spawn_subprocess(
    command: &str,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
) -> anyhow::Result<(Transport, Child)> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for (k, v) in env {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stdin = child.stdin.take().expect("piped stdin");
    let transport = Transport::spawn(stdout, stdin);
    Ok((transport, child))
}
