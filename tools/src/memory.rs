//! An in-memory sandbox host.
//!
//! Files live in a map; processes answer from a script keyed by the full
//! command line, defaulting to a silent success. Every spawn is recorded.

use std::collections::{BTreeMap, HashMap};
use std::iter;
use std::sync::{Mutex, PoisonError};

use shipwright_types::normalize_path;

use crate::host::{HostError, HostFut, ProcessHandle, ProcessOutput, SandboxHost};

#[derive(Debug, Default)]
pub struct MemorySandboxHost {
    files: Mutex<BTreeMap<String, String>>,
    scripts: Mutex<HashMap<String, ProcessOutput>>,
    spawned: Mutex<Vec<String>>,
}

impl MemorySandboxHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_path(path), content.into());
        self
    }

    /// Answer `command_line` (command and args joined by spaces) with `output`.
    pub fn script(&self, command_line: &str, output: ProcessOutput) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command_line.to_string(), output);
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_path(path))
            .cloned()
    }

    /// Command lines spawned so far, in order.
    #[must_use]
    pub fn spawned(&self) -> Vec<String> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SandboxHost for MemorySandboxHost {
    fn spawn_process<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> HostFut<'a, ProcessHandle> {
        Box::pin(async move {
            let line = iter::once(command)
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            let output = self
                .scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&line)
                .cloned()
                .unwrap_or_default();
            self.spawned
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line);
            Ok(ProcessHandle::finished(output))
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> HostFut<'a, ()> {
        Box::pin(async move {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(normalize_path(path), content.to_string());
            Ok(())
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> HostFut<'a, String> {
        Box::pin(async move {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&normalize_path(path))
                .cloned()
                .ok_or_else(|| HostError::NotFound {
                    path: path.to_string(),
                })
        })
    }
}
