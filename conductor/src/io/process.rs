//! Child process execution with a timeout and bounded output.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Lossy UTF-8 stderr, trimmed. Used in oracle feedback.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Bytes kept from one output stream, and how many were discarded past the limit.
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

/// Run `cmd`, feeding `stdin`, killing it after `timeout`.
///
/// Every pipe is serviced on its own thread, so the timeout runs from spawn
/// even when the child never reads its input or floods its output. At most
/// `output_limit_bytes` per stream are kept in memory.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(%err, "failed to spawn command"))
        .context("spawn command")?;

    let stdout = capture(piped(child.stdout.take(), "stdout")?, output_limit_bytes);
    let stderr = capture(piped(child.stderr.take(), "stderr")?, output_limit_bytes);
    if let Some(input) = stdin {
        feed(piped(child.stdin.take(), "stdin")?, input.to_vec());
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = collect(stdout, "stdout")?;
    let stderr = collect(stderr, "stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

fn piped<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| anyhow!("{name} was not piped"))
}

/// Write `input` to the child on a detached thread, then close the pipe.
///
/// The writer unblocks once the child exits or is killed, so it is never joined.
fn feed(mut pipe: ChildStdin, input: Vec<u8>) {
    thread::spawn(move || {
        if let Err(err) = pipe.write_all(&input) {
            // A child that exits without reading stdin closes the pipe early.
            warn!(%err, bytes = input.len(), "child closed stdin before reading all input");
        }
    });
}

fn capture<R: Read + Send + 'static>(mut stream: R, limit: usize) -> JoinHandle<io::Result<Capture>> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        stream.by_ref().take(limit as u64).read_to_end(&mut kept)?;
        let dropped = io::copy(&mut stream, &mut io::sink())?;
        Ok(Capture {
            kept,
            dropped: usize::try_from(dropped).unwrap_or(usize::MAX),
        })
    })
}

fn collect(handle: JoinHandle<io::Result<Capture>>, name: &str) -> Result<Capture> {
    handle
        .join()
        .map_err(|_| anyhow!("{name} reader thread panicked"))?
        .with_context(|| format!("read {name}"))
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_from_stdin() {
        let out = run_command_with_timeout(sh("cat"), Some(b"hello"), Duration::from_secs(10), 1024)
            .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout, b"hello");
        assert!(!out.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted_not_kept() {
        let out = run_command_with_timeout(
            sh("printf 0123456789"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn slow_command_is_killed_on_timeout() {
        let out = run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn input_larger_than_pipe_buffer_is_fully_delivered() {
        let input = vec![b'x'; 200 * 1024];
        let out = run_command_with_timeout(sh("wc -c"), Some(&input), Duration::from_secs(10), 1024)
            .expect("run");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "204800");
    }

    #[test]
    fn timeout_holds_when_child_never_reads_large_input() {
        let input = vec![b'x'; 512 * 1024];
        let started = Instant::now();

        let out = run_command_with_timeout(
            sh("exec sleep 8"),
            Some(&input),
            Duration::from_millis(500),
            1024,
        )
        .expect("run");

        let elapsed = started.elapsed();
        assert!(out.timed_out);
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }
}
