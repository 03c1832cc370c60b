//! Process execution handed to steps.
//!
//! Steps do their real work in child processes; the engine only waits on
//! them. There is no timeout or cancellation here: a process runs until it
//! exits.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Number of stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{command} exited with code {code}{}", format_tail(.stderr_tail))]
    Status {
        command: String,
        code: i32,
        stderr_tail: String,
    },
}

pub type Result<T> = std::result::Result<T, ExecError>;

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{tail}")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `program` with `args` in `cwd`. A non-zero exit is an error carrying
/// the tail of stderr.
pub async fn exec<I, S>(program: &str, args: I, cwd: &Path) -> Result<ExecOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    run(command, program, cwd).await
}

/// Run a shell command line in `cwd`.
pub async fn shell(command_line: &str, cwd: &Path) -> Result<ExecOutput> {
    let mut command = if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C");
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c");
        command
    };
    command.arg(command_line);
    run(command, command_line, cwd).await
}

async fn run(mut command: Command, command_line: &str, cwd: &Path) -> Result<ExecOutput> {
    debug!(command = %command_line, cwd = %cwd.display(), "executing command");

    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let child = command.spawn().map_err(|source| ExecError::Spawn {
        program: command_line.to_string(),
        source,
    })?;
    let output = child.wait_with_output().await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if code != 0 {
        debug!(command = %command_line, exit_code = code, duration_ms, "command failed");
        return Err(ExecError::Status {
            command: command_line.to_string(),
            code,
            stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
        });
    }

    debug!(command = %command_line, duration_ms, "command finished");
    Ok(ExecOutput {
        code,
        stdout,
        stderr,
        duration_ms,
    })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn shell_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let output = shell("echo hello", dir.path()).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn shell_runs_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let output = shell("ls", dir.path()).await.unwrap();
        assert!(output.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_status_error_with_tail() {
        let dir = TempDir::new().unwrap();
        let err = shell("echo broken >&2; exit 3", dir.path())
            .await
            .unwrap_err();
        match err {
            ExecError::Status {
                code, stderr_tail, ..
            } => {
                assert_eq!(code, 3);
                assert_eq!(stderr_tail, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let err = exec("definitely-not-a-real-program-xyz", ["--help"], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }
}
