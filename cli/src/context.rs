//! `shipwright context`: show what the next request would carry.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context as _, Result};
use shipwright_config::ShipwrightConfig;
use shipwright_context::{ContextBuilder, PreparedContext};
use shipwright_engine::FileChangeTracker;
use shipwright_types::{FileCache, Message, Part};

use crate::transcript;

const PREVIEW_CHARS: usize = 80;

pub fn run(config: &ShipwrightConfig, root: &Path, messages: &[Message]) -> Result<String> {
    let files = Arc::new(RwLock::new(FileCache::new()));
    let tracker = FileChangeTracker::new(Arc::clone(&files), config.ignored_prefixes());
    transcript::load_tree(root, &tracker)?;

    let mut builder = ContextBuilder::new(config.context_limits())
        .with_prewarm_paths(config.prewarm_paths().iter().map(String::as_str));
    let prepared = builder
        .build(
            messages,
            &files.read().unwrap_or_else(PoisonError::into_inner),
        )
        .context("context does not fit the configured budget")?;
    Ok(render(&prepared))
}

fn preview(part: &Part) -> String {
    let text = match part {
        Part::Text { text } => text.as_str(),
        Part::Reasoning { .. } => return "[reasoning]".to_string(),
        Part::File { mime_type, .. } => return format!("[file {mime_type}]"),
        Part::ToolInvocation { invocation } => {
            return format!(
                "[{} {} {:?}]",
                invocation.tool_name, invocation.tool_call_id, invocation.state
            );
        }
    };
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

fn render(prepared: &PreparedContext) -> String {
    let mut out = String::new();
    for (index, message) in prepared.messages().iter().enumerate() {
        let _ = writeln!(out, "{index:>3} {}", message.role().as_str());
        for part in message.parts() {
            let _ = writeln!(out, "      {}", preview(part));
        }
    }
    if !prepared.relevant_files().is_empty() {
        let _ = writeln!(out, "\nrelevant files:");
        for path in prepared.relevant_files() {
            let _ = writeln!(out, "  {path}");
        }
    }
    let _ = writeln!(out, "\nusage: {}", prepared.usage().format_compact());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_types::MessageId;
    use std::fs;
    use std::time::SystemTime;

    #[test]
    fn prints_messages_and_usage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let mut reply = Message::assistant(MessageId::new("a"), SystemTime::UNIX_EPOCH);
        reply.append_text("Here is your page.");
        let messages = vec![
            Message::user(MessageId::new("u"), "make a page", SystemTime::UNIX_EPOCH),
            reply,
        ];

        let out = run(&ShipwrightConfig::default(), dir.path(), &messages).unwrap();
        assert!(out.contains("user"));
        assert!(out.contains("make a page"));
        assert!(out.contains("usage: "));
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = Part::text("word ".repeat(40));
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
