//! A sandbox host backed by a local project directory.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use shipwright_types::normalize_path;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::host::{HostError, HostFut, ProcessHandle, SandboxHost};

#[derive(Debug, Clone)]
pub struct LocalSandboxHost {
    root: PathBuf,
}

impl LocalSandboxHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a project path onto the root. Normalization keeps it from climbing
    /// above the root.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let normalized = normalize_path(path);
        self.root.join(normalized.trim_start_matches('/'))
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(format!("{line}\n")).is_err() {
                break;
            }
        }
    });
}

impl SandboxHost for LocalSandboxHost {
    fn spawn_process<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> HostFut<'a, ProcessHandle> {
        Box::pin(async move {
            let mut child = Command::new(command)
                .args(args)
                .current_dir(&self.root)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| HostError::Spawn {
                    command: command.to_string(),
                    source,
                })?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            if let Some(stdout) = child.stdout.take() {
                forward_lines(stdout, out_tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(stderr, out_tx);
            }

            let (exit_tx, exit_rx) = oneshot::channel();
            let command = command.to_string();
            tokio::spawn(async move {
                let code = match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        tracing::warn!(command = %command, "Failed to wait for process: {e}");
                        -1
                    }
                };
                let _ = exit_tx.send(code);
            });

            Ok(ProcessHandle {
                output: out_rx,
                exit: exit_rx,
            })
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> HostFut<'a, ()> {
        Box::pin(async move {
            let resolved = self.resolve(path);
            let io_err = |source: io::Error| HostError::Io {
                path: path.to_string(),
                source,
            };
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            fs::write(&resolved, content).await.map_err(io_err)
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> HostFut<'a, String> {
        Box::pin(async move {
            let resolved = self.resolve(path);
            fs::read_to_string(&resolved)
                .await
                .map_err(|source| match source.kind() {
                    ErrorKind::NotFound => HostError::NotFound {
                        path: path.to_string(),
                    },
                    _ => HostError::Io {
                        path: path.to_string(),
                        source,
                    },
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_under_root() {
        let host = LocalSandboxHost::new("/tmp/project");
        assert_eq!(
            host.resolve("/src/App.tsx"),
            PathBuf::from("/tmp/project/src/App.tsx")
        );
        assert_eq!(
            host.resolve("../../etc/passwd"),
            PathBuf::from("/tmp/project/etc/passwd")
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalSandboxHost::new(dir.path());
        host.write_file("/src/deep/a.ts", "export {}").await.unwrap();
        assert_eq!(host.read_file("src/deep/a.ts").await.unwrap(), "export {}");
        assert!(matches!(
            host.read_file("/missing.ts").await,
            Err(HostError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_process_collects_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalSandboxHost::new(dir.path());
        let args = vec!["-c".to_string(), "echo hi; exit 2".to_string()];
        let output = host
            .spawn_process("sh", &args)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(output.output, "hi\n");
        assert_eq!(output.exit_code, 2);
    }
}
