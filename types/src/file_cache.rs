//! In-memory mirror of the sandbox filesystem.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileEntry {
    File { content: String },
    Directory,
}

impl FileEntry {
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            FileEntry::File { content } => Some(content),
            FileEntry::Directory => None,
        }
    }
}

/// Normalize a project path to the cache's key form: rooted at `/`, no `.`
/// segments, no empty segments, no trailing slash.
///
/// `..` pops a segment but never climbs above the root.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Path → entry map; sorted so listings and snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileCache {
    entries: BTreeMap<String, FileEntry>,
}

impl FileCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(&normalize_path(path))
    }

    #[must_use]
    pub fn file_content(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(FileEntry::content)
    }

    /// Insert or replace a file, creating any missing parent directories.
    pub fn write_file(&mut self, path: &str, content: impl Into<String>) {
        let key = normalize_path(path);
        self.ensure_parents(&key);
        self.entries.insert(
            key,
            FileEntry::File {
                content: content.into(),
            },
        );
    }

    pub fn create_dir(&mut self, path: &str) {
        let key = normalize_path(path);
        if key == "/" {
            return;
        }
        self.ensure_parents(&key);
        self.entries.entry(key).or_insert(FileEntry::Directory);
    }

    /// Remove a path and everything beneath it. Returns whether anything was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        let key = normalize_path(path);
        let prefix = format!("{key}/");
        let before = self.entries.len();
        self.entries
            .retain(|existing, _| existing != &key && !existing.starts_with(&prefix));
        before != self.entries.len()
    }

    fn ensure_parents(&mut self, key: &str) {
        let mut end = 0;
        while let Some(offset) = key[end + 1..].find('/') {
            end += offset + 1;
            self.entries
                .entry(key[..end].to_string())
                .or_insert(FileEntry::Directory);
        }
    }

    /// All file (not directory) paths, sorted.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, FileEntry::File { .. }))
            .map(|(path, _)| path.as_str())
    }

    /// Direct children of a directory, sorted.
    pub fn children(&self, dir: &str) -> Vec<&str> {
        let key = normalize_path(dir);
        let prefix = if key == "/" { key } else { format!("{key}/") };
        self.entries
            .keys()
            .filter(|path| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(String::as_str)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }
}
