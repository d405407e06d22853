//! Transcript and project tree loading.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use shipwright_engine::{FileChange, FileChangeTracker};
use shipwright_types::Message;

/// Read a transcript: a JSON array of messages.
pub fn load(path: &Path) -> Result<Vec<Message>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    let messages: Vec<Message> = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse transcript {}", path.display()))?;
    tracing::info!(path = %path.display(), messages = messages.len(), "Loaded transcript");
    Ok(messages)
}

/// Load the project's text files into the tracker's cache as one batch.
pub fn load_tree(root: &Path, tracker: &FileChangeTracker) -> Result<u64> {
    let mut changes = Vec::new();
    collect(root, root, tracker, &mut changes)
        .with_context(|| format!("failed to read project {}", root.display()))?;
    tracing::debug!(files = changes.len(), "Loaded project tree");
    Ok(tracker.apply_batch(changes))
}

fn collect(
    root: &Path,
    dir: &Path,
    tracker: &FileChangeTracker,
    changes: &mut Vec<FileChange>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
        if tracker.is_ignored(&relative) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            changes.push(FileChange::CreateDir {
                path: relative.clone(),
            });
            collect(root, &path, tracker, changes)?;
        } else if file_type.is_file() {
            match fs::read_to_string(&path) {
                Ok(content) => changes.push(FileChange::Write {
                    path: relative,
                    content,
                }),
                Err(e) => tracing::debug!(path = %relative, "Skipping unreadable file: {e}"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_engine::DEFAULT_IGNORED_PREFIXES;
    use shipwright_types::FileCache;
    use std::sync::{Arc, RwLock};

    #[test]
    fn tree_skips_ignored_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/react")).unwrap();
        fs::write(dir.path().join("src/App.tsx"), "export {}").unwrap();
        fs::write(dir.path().join("node_modules/react/index.js"), "x").unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();

        let tracker = FileChangeTracker::new(
            Arc::new(RwLock::new(FileCache::new())),
            DEFAULT_IGNORED_PREFIXES,
        );
        assert_eq!(load_tree(dir.path(), &tracker).unwrap(), 1);

        let files = tracker.files().read().unwrap();
        assert_eq!(files.file_content("/src/App.tsx"), Some("export {}"));
        assert_eq!(files.file_content("/package.json"), Some("{}"));
        assert!(files.file_content("/node_modules/react/index.js").is_none());
    }

    #[test]
    fn missing_transcript_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read transcript"));
    }
}
