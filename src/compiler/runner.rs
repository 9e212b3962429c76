//! Invocation of the external compiler

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::compiler::error::RunnerError;
use crate::config::DEFAULT_MAX_OUTPUT_BYTES;

const FILE_PLACEHOLDER: &str = "${file}";
const LINE_PLACEHOLDER: &str = "${line}";
const CHARACTER_PLACEHOLDER: &str = "${character}";

/// A concrete compiler command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Captured stdout is cut off after this many bytes
    pub max_output_bytes: usize,
}

impl Invocation {
    /// Fills `${file}` in `template`. When no argument mentions `${file}`,
    /// the file is appended as the last argument.
    pub fn new(program: &str, template: &[String], file: &str) -> Self {
        let mut found = false;
        let mut args: Vec<String> = template
            .iter()
            .map(|arg| {
                if arg.contains(FILE_PLACEHOLDER) {
                    found = true;
                    arg.replace(FILE_PLACEHOLDER, file)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !found {
            args.push(file.to_string());
        }

        Self {
            program: program.to_string(),
            args,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Fills `${line}` (1-based) and `${character}` (0-based).
    pub fn at_position(mut self, line: u32, character: u32) -> Self {
        let line = line.to_string();
        let character = character.to_string();
        for arg in &mut self.args {
            if arg.contains(LINE_PLACEHOLDER) {
                *arg = arg.replace(LINE_PLACEHOLDER, &line);
            }
            if arg.contains(CHARACTER_PLACEHOLDER) {
                *arg = arg.replace(CHARACTER_PLACEHOLDER, &character);
            }
        }
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs the compiler.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Returns whatever the compiler printed to stdout.
    ///
    /// Spawn failures and non-zero exits are logged, never returned; the
    /// caller sees empty or partial output instead.
    async fn run(&self, invocation: &Invocation) -> String;
}

/// [`Runner`] backed by a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn capture(&self, invocation: &Invocation) -> Result<String, RunnerError> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let limit = invocation.max_output_bytes;
        let (stdout, stderr) = tokio::join!(
            read_limited(child.stdout.take(), limit),
            read_limited(child.stderr.take(), limit)
        );

        let status = child.wait().await.map_err(|source| RunnerError::Wait {
            program: invocation.program.clone(),
            source,
        });
        match status {
            Ok(status) if !status.success() => {
                warn!("{} exited with {}", invocation.program, status);
            }
            Ok(_) => {}
            Err(e) => warn!("{}", e),
        }

        if stdout.truncated {
            warn!(
                "Output of {} truncated at {} bytes",
                invocation.program, limit
            );
        }
        if !stderr.bytes.is_empty() {
            debug!(
                "{} stderr: {}",
                invocation.program,
                String::from_utf8_lossy(&stderr.bytes)
            );
        }

        Ok(String::from_utf8_lossy(&stdout.bytes).into_owned())
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> String {
        debug!("> {}", invocation);
        self.capture(invocation).await.unwrap_or_else(|e| {
            warn!("{}", e);
            String::new()
        })
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Reads at most `limit` bytes, keeping whatever arrived before an error.
async fn read_limited<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Captured {
    let Some(reader) = reader else {
        return Captured::default();
    };

    let mut bytes = Vec::new();
    let mut limited = reader.take(limit as u64 + 1);
    if let Err(e) = limited.read_to_end(&mut bytes).await {
        warn!("Failed to read compiler output: {}", e);
    }

    let truncated = bytes.len() > limit;
    bytes.truncate(limit);
    Captured { bytes, truncated }
}
