//! Command executor: runs dump/restore tools from an argument list, never through a shell.
//!
//! Secrets travel as environment variables set on the child only, so they do not
//! show up in process listings. Captured stdout is bounded; a child exceeding the
//! bound is killed.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{AppError, Result};
use crate::utils::find_executable;

/// How much of stderr is kept for error messages.
const STDERR_TAIL_BYTES: usize = 4096;
const READ_CHUNK: usize = 64 * 1024;

/// A fully parameterized command.
#[derive(Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child, typically the password.
    pub envs: Vec<(String, String)>,
    /// File fed to the child's stdin.
    pub stdin_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("stdin_file", &self.stdin_file)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub capture_stdout: bool,
    pub max_output_bytes: usize,
}

impl ExecOptions {
    pub fn capture(max_output_bytes: usize) -> Self {
        Self {
            capture_stdout: true,
            max_output_bytes,
        }
    }

    pub fn discard_output() -> Self {
        Self {
            capture_stdout: false,
            max_output_bytes: 0,
        }
    }
}

/// Result of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    /// Empty unless `capture_stdout` was requested.
    pub stdout: Vec<u8>,
}

/// Runs external commands. Non-zero exits come back as `AppError::Process`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, opts: ExecOptions) -> Result<ExecOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, opts: ExecOptions) -> Result<ExecOutput> {
        let program_path = find_executable(&spec.program)?;

        let stdin = match &spec.stdin_file {
            Some(path) => Stdio::from(std::fs::File::open(path)?),
            None => Stdio::null(),
        };

        let mut cmd = Command::new(&program_path);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(stdin)
            .stdout(if opts.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program_path.display(), args = ?spec.args, "spawning");
        let mut child = cmd.spawn().map_err(|source| AppError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES)));

        let stdout = match child.stdout.take() {
            Some(out) if opts.capture_stdout => match read_capped(out, opts.max_output_bytes).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!(
                        program = %spec.program,
                        limit = opts.max_output_bytes,
                        "output limit exceeded, killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(program = %spec.program, error = %e, "failed to kill process");
                    }
                    return Err(AppError::OutputTooLarge {
                        program: spec.program.clone(),
                        limit: opts.max_output_bytes,
                    });
                }
                Err(e) => return Err(e.into()),
            },
            _ => Vec::new(),
        };

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(AppError::Process {
                program: spec.program.clone(),
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        debug!(program = %spec.program, captured_bytes = stdout.len(), "process finished");
        Ok(ExecOutput {
            exit_code: status.code(),
            stdout,
        })
    }
}

/// Reads everything from `reader`, or `None` as soon as more than `limit` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Some(buf));
        }
        if buf.len() + n > limit {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drains `reader`, keeping only the last `keep` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > keep {
                    let excess = tail.len() - keep;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}
