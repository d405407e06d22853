//! File change tracking.
//!
//! Sandbox mutations arrive as discrete events. The tracker applies them to
//! the shared file cache and publishes a monotonic counter that bumps once per
//! applied batch; the sync worker compares it against the last persisted value.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use shipwright_types::{FileCache, normalize_path};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Default prefixes whose mutations are never counted.
pub const DEFAULT_IGNORED_PREFIXES: [&str; 3] = ["node_modules", ".git", "dist"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Write { path: String, content: String },
    CreateDir { path: String },
    Remove { path: String },
}

impl FileChange {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            FileChange::Write { path, .. }
            | FileChange::CreateDir { path }
            | FileChange::Remove { path } => path,
        }
    }
}

#[derive(Debug)]
pub struct FileChangeTracker {
    files: Arc<RwLock<FileCache>>,
    ignored: Vec<String>,
    counter: watch::Sender<u64>,
}

impl FileChangeTracker {
    pub fn new<I, S>(files: Arc<RwLock<FileCache>>, ignored_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ignored = ignored_prefixes
            .into_iter()
            .map(|prefix| normalize_path(prefix.as_ref()))
            .collect();
        let (counter, _) = watch::channel(0);
        Self {
            files,
            ignored,
            counter,
        }
    }

    #[must_use]
    pub fn files(&self) -> &Arc<RwLock<FileCache>> {
        &self.files
    }

    /// Whether `path` falls under an ignored prefix, matched by whole segments.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.ignored.iter().any(|prefix| {
            path == *prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        *self.counter.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.counter.subscribe()
    }

    /// Apply a batch of changes. Bumps the counter once if anything outside the
    /// ignored prefixes changed, and returns the counter.
    pub fn apply_batch<I>(&self, changes: I) -> u64
    where
        I: IntoIterator<Item = FileChange>,
    {
        let mut applied = 0usize;
        {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            for change in changes {
                if self.is_ignored(change.path()) {
                    continue;
                }
                match change {
                    FileChange::Write { path, content } => files.write_file(&path, content),
                    FileChange::CreateDir { path } => files.create_dir(&path),
                    FileChange::Remove { path } => {
                        files.remove(&path);
                    }
                }
                applied += 1;
            }
        }
        if applied > 0 {
            self.counter.send_modify(|n| *n += 1);
            tracing::debug!(applied, counter = self.counter(), "Applied file changes");
        }
        self.counter()
    }

    /// Drain `events`, coalescing everything that arrives within `window` of
    /// the first event into one batch.
    pub fn spawn_debounced(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<FileChange>,
        window: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(first) = events.recv().await {
                let mut batch = vec![first];
                let deadline = Instant::now() + window;
                loop {
                    tokio::select! {
                        () = sleep_until(deadline) => break,
                        next = events.recv() => match next {
                            Some(change) => batch.push(change),
                            None => break,
                        },
                    }
                }
                self.apply_batch(batch);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> FileChangeTracker {
        FileChangeTracker::new(
            Arc::new(RwLock::new(FileCache::new())),
            DEFAULT_IGNORED_PREFIXES,
        )
    }

    fn write(path: &str) -> FileChange {
        FileChange::Write {
            path: path.into(),
            content: "x".into(),
        }
    }

    #[test]
    fn ignores_prefixes_by_segment() {
        let tracker = tracker();
        assert!(tracker.is_ignored("/node_modules/react/index.js"));
        assert!(tracker.is_ignored("node_modules"));
        assert!(!tracker.is_ignored("/node_modules_extra/a.js"));
        assert!(!tracker.is_ignored("/src/dist.ts"));
    }

    #[test]
    fn batch_bumps_counter_once() {
        let tracker = tracker();
        assert_eq!(tracker.apply_batch([write("/a.ts"), write("/b.ts")]), 1);
        assert_eq!(tracker.apply_batch([write("/.git/HEAD")]), 1);
        assert_eq!(
            tracker.apply_batch([FileChange::Remove {
                path: "/a.ts".into()
            }]),
            2
        );
        let files = tracker.files().read().unwrap();
        assert!(files.file_content("/a.ts").is_none());
        assert_eq!(files.file_content("/b.ts"), Some("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_events_coalesce_into_one_bump() {
        let tracker = Arc::new(tracker());
        let mut counter = tracker.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = Arc::clone(&tracker).spawn_debounced(rx, Duration::from_millis(50));

        tx.send(write("/a.ts")).unwrap();
        tx.send(write("/b.ts")).unwrap();
        tx.send(write("/c.ts")).unwrap();
        counter.changed().await.unwrap();
        assert_eq!(*counter.borrow(), 1);
        assert_eq!(tracker.files().read().unwrap().len(), 3);

        drop(tx);
        task.await.unwrap();
        assert_eq!(tracker.counter(), 1);
    }
}
