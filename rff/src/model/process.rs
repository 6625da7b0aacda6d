//! Child process plumbing for command-backed models.
//!
//! The prompt is piped to stdin while both output pipes are drained on reader
//! threads, so a chatty model cannot block on a full pipe.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// How a model command ended.
#[derive(Debug)]
pub enum Exit {
    Finished(ExitStatus),
    /// Killed after exceeding the timeout.
    TimedOut,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit: Exit,
    pub stdout: Captured,
    pub stderr: Captured,
}

/// Spawn `cmd`, write `input` to its stdin, and wait up to `timeout`.
///
/// At most `limit` bytes of each stream are kept; the rest is read and
/// dropped.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, limit))]
pub fn run_piped(
    mut cmd: Command,
    input: &[u8],
    timeout: Duration,
    limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn model command")?;

    let stdout = spawn_reader(child.stdout.take(), limit, "stdout")?;
    let stderr = spawn_reader(child.stderr.take(), limit, "stderr")?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    if let Err(err) = stdin.write_all(input) {
        // A command may exit without reading the prompt; its status decides.
        debug!(err = %err, "model command closed stdin early");
    }
    drop(stdin);

    let exit = match child.wait_timeout(timeout).context("wait for model command")? {
        Some(status) => Exit::Finished(status),
        None => {
            child.kill().context("kill model command")?;
            child.wait().context("reap model command")?;
            Exit::TimedOut
        }
    };

    let stdout = join_reader(stdout).context("read model stdout")?;
    let stderr = join_reader(stderr).context("read model stderr")?;
    if stdout.dropped > 0 {
        warn!(dropped = stdout.dropped, "model output exceeded limit");
    }
    debug!(exit = ?exit, stdout_bytes = stdout.bytes.len(), "model command exited");
    Ok(ProcessOutput {
        exit,
        stdout,
        stderr,
    })
}

fn spawn_reader<R>(
    stream: Option<R>,
    limit: usize,
    name: &str,
) -> Result<JoinHandle<Result<Captured>>>
where
    R: Read + Send + 'static,
{
    let stream = stream.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || read_bounded(stream, limit)))
}

fn join_reader(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_bounded<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}
