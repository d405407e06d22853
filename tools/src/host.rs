//! The sandbox host boundary.
//!
//! The execution environment itself is a black box: it can run a process,
//! write a file, and read a file. Everything else is built on those three.

use std::future::Future;
use std::io;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Host operation future type alias.
pub type HostFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, HostError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no such file: {path}")]
    NotFound { path: String },
    #[error("process exited without reporting a status")]
    Lost,
}

/// A running process: its combined output as it arrives, and its exit code.
#[derive(Debug)]
pub struct ProcessHandle {
    pub output: mpsc::UnboundedReceiver<String>,
    pub exit: oneshot::Receiver<i32>,
}

/// Everything a finished process produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub output: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl ProcessHandle {
    /// Build a handle that has already finished with `output`.
    #[must_use]
    pub fn finished(output: ProcessOutput) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        if !output.output.is_empty() {
            let _ = out_tx.send(output.output);
        }
        let _ = exit_tx.send(output.exit_code);
        Self {
            output: out_rx,
            exit: exit_rx,
        }
    }

    /// Drain the output stream and wait for the exit code.
    pub async fn wait(mut self) -> Result<ProcessOutput, HostError> {
        let mut output = String::new();
        while let Some(chunk) = self.output.recv().await {
            output.push_str(&chunk);
        }
        let exit_code = self.exit.await.map_err(|_| HostError::Lost)?;
        Ok(ProcessOutput { output, exit_code })
    }
}

pub trait SandboxHost: Send + Sync {
    /// Start `command` with `args` in the project root.
    fn spawn_process<'a>(&'a self, command: &'a str, args: &'a [String])
    -> HostFut<'a, ProcessHandle>;

    /// Write `content` to `path`, creating parent directories.
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> HostFut<'a, ()>;

    fn read_file<'a>(&'a self, path: &'a str) -> HostFut<'a, String>;
}
