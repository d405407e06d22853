//! Context window assembly.
//!
//! The request is built in three segments, in order:
//! 1. a listing of every project file path (only when some file is relevant)
//! 2. relevant file contents, most recently written first, one system message each
//! 3. conversation history, with old assistant turns optionally collapsed to prose

use std::collections::HashMap;
use std::time::SystemTime;

use shipwright_parser::strip_markup;
use shipwright_types::{FileCache, Message, MessageId, Part, Role, normalize_path};
use thiserror::Error;

use crate::memo::PartCache;
use crate::usage::ContextUsage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLimits {
    /// Ceiling for the whole prepared message list, in characters.
    pub max_chars: usize,
    pub max_relevant_files: usize,
    pub max_relevant_files_chars: usize,
    pub collapse: bool,
    /// Full-fidelity history above this size moves the collapse cutoff forward...
    pub max_collapsed_history_chars: usize,
    /// ...until it is back under this size.
    pub min_collapsed_history_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_chars: 400_000,
            max_relevant_files: 16,
            max_relevant_files_chars: 64_000,
            collapse: true,
            max_collapsed_history_chars: 120_000,
            min_collapsed_history_chars: 60_000,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextBuildError {
    /// The history that must stay verbatim is larger than the whole budget.
    #[error(
        "recent messages need {required_chars} chars but the budget is {budget_chars} ({message_count} messages)"
    )]
    RecentMessagesTooLarge {
        required_chars: usize,
        budget_chars: usize,
        message_count: usize,
    },
}

/// Proof that a context was assembled within budget.
#[derive(Debug, Clone)]
pub struct PreparedContext {
    messages: Vec<Message>,
    relevant_files: Vec<String>,
    usage: ContextUsage,
}

impl PreparedContext {
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Paths whose content was rendered, in the order they appear.
    #[must_use]
    pub fn relevant_files(&self) -> &[String] {
        &self.relevant_files
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        self.usage
    }
}

/// Relevance rank for paths that were prewarmed but never written.
const PREWARM_RANK: i64 = -1;

#[derive(Debug, Default)]
pub struct ContextBuilder {
    limits: ContextLimits,
    prewarm: Vec<String>,
    cache: PartCache,
    /// Messages before this index are eligible for collapse. Only moves forward
    /// for a given conversation.
    collapse_cutoff: usize,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Paths considered relevant before anything writes them, such as the
    /// entry point of a template.
    pub fn with_prewarm_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.prewarm = paths
            .into_iter()
            .map(|p| normalize_path(p.as_ref()))
            .collect();
        self
    }

    #[must_use]
    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    #[must_use]
    pub fn collapse_cutoff(&self) -> usize {
        self.collapse_cutoff
    }

    /// Build the bounded message list for the next model request.
    pub fn build(
        &mut self,
        messages: &[Message],
        files: &FileCache,
    ) -> Result<PreparedContext, ContextBuildError> {
        let (history, history_chars, collapsed) = self.history_segment(messages);
        if history_chars > self.limits.max_chars {
            return Err(ContextBuildError::RecentMessagesTooLarge {
                required_chars: history_chars,
                budget_chars: self.limits.max_chars,
                message_count: history.len(),
            });
        }

        let stamp = messages
            .first()
            .map_or(SystemTime::UNIX_EPOCH, Message::created_at);
        let listing = file_listing(files);
        let listing_chars = listing.chars().count();

        let mut out = Vec::new();
        let mut used = history_chars;
        let mut relevant_files = Vec::new();

        let room = self.limits.max_chars - history_chars;
        if room > listing_chars {
            let file_budget = self
                .limits
                .max_relevant_files_chars
                .min(room - listing_chars);
            let mut file_messages = Vec::new();
            let mut files_chars = 0;
            for path in self.relevant_paths(messages, files) {
                if relevant_files.len() >= self.limits.max_relevant_files {
                    break;
                }
                let Some(content) = files.file_content(&path) else {
                    tracing::debug!(%path, "Relevant file no longer exists; skipping");
                    continue;
                };
                let rendered = render_file(&path, content);
                let chars = rendered.chars().count();
                if files_chars + chars > file_budget {
                    break;
                }
                files_chars += chars;
                file_messages.push(Message::system(
                    MessageId::new(format!("context-file:{path}")),
                    rendered,
                    stamp,
                ));
                relevant_files.push(path);
            }

            if !file_messages.is_empty() {
                out.push(Message::system(
                    MessageId::new("context-files"),
                    listing,
                    stamp,
                ));
                out.extend(file_messages);
                used += listing_chars + files_chars;
            }
        }

        out.extend(history);
        let usage = ContextUsage {
            used_chars: used,
            budget_chars: self.limits.max_chars,
            collapsed_messages: collapsed,
            relevant_files: relevant_files.len(),
        };
        tracing::debug!(
            used_chars = usage.used_chars,
            files = usage.relevant_files,
            collapsed = usage.collapsed_messages,
            "Context prepared"
        );
        Ok(PreparedContext {
            messages: out,
            relevant_files,
            usage,
        })
    }

    /// Candidate paths, most relevant first.
    ///
    /// Each path ranks by the index of the latest assistant message that wrote
    /// it; prewarmed paths nothing has written rank below every written one.
    fn relevant_paths(&mut self, messages: &[Message], files: &FileCache) -> Vec<String> {
        let mut ranks: HashMap<String, i64> = HashMap::new();
        for (index, message) in messages.iter().enumerate() {
            if message.role() != Role::Assistant {
                continue;
            }
            for (part_index, part) in message.parts().iter().enumerate() {
                let part_id = message.part_id(part_index);
                for path in self.cache.written_paths(&part_id, part) {
                    ranks.insert(path.clone(), index as i64);
                }
            }
        }

        for path in &self.prewarm {
            if files.file_content(path).is_none() {
                tracing::debug!(%path, "Prewarm path not in file cache; skipping");
                continue;
            }
            ranks.entry(path.clone()).or_insert(PREWARM_RANK);
        }

        let mut ranked: Vec<(String, i64)> = ranks.into_iter().collect();
        ranked.sort_by(|(a_path, a_rank), (b_path, b_rank)| {
            b_rank.cmp(a_rank).then_with(|| a_path.cmp(b_path))
        });
        ranked.into_iter().map(|(path, _)| path).collect()
    }

    /// History messages, the character count they add, and how many were
    /// collapsed.
    fn history_segment(&mut self, messages: &[Message]) -> (Vec<Message>, usize, usize) {
        if !self.limits.collapse {
            let chars: usize = messages.iter().map(|m| self.full_chars(m)).sum();
            return (messages.to_vec(), chars, 0);
        }

        // Everything from the last user message on stays verbatim.
        let window_start = messages
            .iter()
            .rposition(|m| m.role() == Role::User)
            .unwrap_or(messages.len());
        self.advance_cutoff(messages, window_start);

        let mut out = Vec::with_capacity(messages.len());
        let mut chars = 0;
        let mut collapsed = 0;
        for (index, message) in messages.iter().enumerate() {
            if index < self.collapse_cutoff && message.role() == Role::Assistant {
                collapsed += 1;
                if let Some(summary) = collapse_message(message) {
                    chars += summary.text_content().chars().count();
                    out.push(summary);
                }
            } else {
                chars += self.full_chars(message);
                out.push(message.clone());
            }
        }
        (out, chars, collapsed)
    }

    /// Move the sticky cutoff forward when the history has grown past the
    /// high-water mark, far enough to bring it under the low-water mark. Both
    /// marks are capped by `max_chars`.
    fn advance_cutoff(&mut self, messages: &[Message], window_start: usize) {
        if self.collapse_cutoff > messages.len() {
            // A different (shorter) conversation; start over.
            self.collapse_cutoff = 0;
        }
        let high = self
            .limits
            .max_collapsed_history_chars
            .min(self.limits.max_chars);
        let low = self.limits.min_collapsed_history_chars.min(high);

        let sizes: Vec<usize> = messages
            .iter()
            .map(|message| self.full_chars(message))
            .collect();
        let mut projected: usize = sizes[self.collapse_cutoff..].iter().sum();
        for (message, size) in messages.iter().zip(&sizes).take(self.collapse_cutoff) {
            projected += if message.role() == Role::Assistant {
                self.prose_chars(message)
            } else {
                *size
            };
        }
        if projected <= high {
            return;
        }

        let mut cutoff = self.collapse_cutoff;
        while cutoff < window_start && projected > low {
            projected -= sizes[cutoff];
            if messages[cutoff].role() == Role::Assistant {
                projected += self.prose_chars(&messages[cutoff]);
            }
            cutoff += 1;
        }
        if cutoff != self.collapse_cutoff {
            tracing::debug!(from = self.collapse_cutoff, to = cutoff, "Collapse cutoff advanced");
            self.collapse_cutoff = cutoff;
        }
    }

    fn full_chars(&mut self, message: &Message) -> usize {
        message
            .parts()
            .iter()
            .enumerate()
            .map(|(index, part)| self.cache.full_chars(&message.part_id(index), part))
            .sum()
    }

    fn prose_chars(&mut self, message: &Message) -> usize {
        message
            .parts()
            .iter()
            .enumerate()
            .map(|(index, part)| self.cache.prose_chars(&message.part_id(index), part))
            .sum()
    }
}

/// Replace an assistant message with a system message holding only its prose.
fn collapse_message(message: &Message) -> Option<Message> {
    let prose: String = message
        .parts()
        .iter()
        .filter_map(Part::as_text)
        .map(|text| strip_markup(text))
        .collect();
    let prose = prose.trim();
    if prose.is_empty() {
        return None;
    }
    Some(Message::system(
        MessageId::new(format!("collapsed:{}", message.id())),
        prose.to_string(),
        message.created_at(),
    ))
}

fn file_listing(files: &FileCache) -> String {
    let mut listing = String::from("Project files:\n");
    for path in files.file_paths() {
        listing.push_str(path);
        listing.push('\n');
    }
    listing
}

fn render_file(path: &str, content: &str) -> String {
    format!("Current contents of {path}:\n```\n{content}\n```")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shipwright_types::ToolInvocationPart;

    const AT: SystemTime = SystemTime::UNIX_EPOCH;

    fn file_artifact(path: &str, content: &str) -> String {
        format!(
            r#"<artifact id="a" title="T"><action type="file" path="{path}">{content}</action></artifact>"#
        )
    }

    fn assistant(id: &str, text: &str) -> Message {
        let mut message = Message::assistant(MessageId::new(id), AT);
        message.append_text(text);
        message
    }

    fn cache_with(paths: &[(&str, &str)]) -> FileCache {
        let mut files = FileCache::new();
        for (path, content) in paths {
            files.write_file(path, *content);
        }
        files
    }

    #[test]
    fn max_file_count_keeps_most_recent_write() {
        let messages = vec![
            assistant("m0", &file_artifact("/a.ts", "a")),
            assistant("m1", &file_artifact("/b.ts", "b")),
        ];
        let files = cache_with(&[("/a.ts", "a"), ("/b.ts", "b")]);
        let mut builder = ContextBuilder::new(ContextLimits {
            max_relevant_files: 1,
            ..ContextLimits::default()
        });

        let prepared = builder.build(&messages, &files).unwrap();
        assert_eq!(prepared.relevant_files(), ["/b.ts".to_string()]);
        // listing + one file + two history messages
        assert_eq!(prepared.messages().len(), 4);
        assert!(prepared.messages()[0].text_content().contains("/a.ts"));
    }

    #[test]
    fn no_listing_when_nothing_is_relevant() {
        let messages = vec![Message::user(MessageId::new("u"), "hello", AT)];
        let files = cache_with(&[("/a.ts", "a")]);
        let mut builder = ContextBuilder::new(ContextLimits::default());
        let prepared = builder.build(&messages, &files).unwrap();
        assert_eq!(prepared.messages().len(), 1);
        assert!(prepared.relevant_files().is_empty());
    }

    #[test]
    fn prewarm_ranks_below_written_and_skips_missing() {
        let messages = vec![assistant("m0", &file_artifact("/b.ts", "b"))];
        let files = cache_with(&[("/b.ts", "b"), ("/src/App.tsx", "app")]);
        let mut builder = ContextBuilder::new(ContextLimits::default())
            .with_prewarm_paths(["src/App.tsx", "/missing.ts"]);

        let prepared = builder.build(&messages, &files).unwrap();
        assert_eq!(
            prepared.relevant_files(),
            ["/b.ts".to_string(), "/src/App.tsx".to_string()]
        );
    }

    #[test]
    fn deleted_files_are_skipped() {
        let messages = vec![
            assistant("m0", &file_artifact("/gone.ts", "x")),
            assistant("m1", &file_artifact("/kept.ts", "y")),
        ];
        let files = cache_with(&[("/kept.ts", "y")]);
        let mut builder = ContextBuilder::new(ContextLimits::default());
        let prepared = builder.build(&messages, &files).unwrap();
        assert_eq!(prepared.relevant_files(), ["/kept.ts".to_string()]);
    }

    #[test]
    fn file_char_budget_drops_the_rest() {
        let messages = vec![
            assistant("m0", &file_artifact("/small.ts", "s")),
            assistant("m1", &file_artifact("/big.ts", "b")),
        ];
        let files = cache_with(&[("/big.ts", &"x".repeat(500)), ("/small.ts", "s")]);
        let mut builder = ContextBuilder::new(ContextLimits {
            max_relevant_files_chars: 100,
            ..ContextLimits::default()
        });
        let prepared = builder.build(&messages, &files).unwrap();
        assert!(prepared.relevant_files().is_empty());
    }

    #[test]
    fn tool_edits_count_as_writes() {
        let mut message = Message::assistant(MessageId::new("m0"), AT);
        message.push_part(Part::tool_invocation(ToolInvocationPart::call(
            "c1",
            "edit",
            json!({"path": "/convex/schema.ts", "old": "a", "new": "b"}),
        )));
        let files = cache_with(&[("/convex/schema.ts", "b")]);
        let mut builder = ContextBuilder::new(ContextLimits::default());
        let prepared = builder.build(&[message], &files).unwrap();
        assert_eq!(prepared.relevant_files(), ["/convex/schema.ts".to_string()]);
    }

    fn long_conversation(turns: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        for turn in 0..turns {
            messages.push(Message::user(MessageId::new(format!("u{turn}")), "go", AT));
            messages.push(assistant(
                &format!("a{turn}"),
                &format!("Step {turn}. {}", file_artifact("/f.ts", &"x".repeat(100))),
            ));
        }
        messages
    }

    #[test]
    fn collapse_replaces_old_assistant_turns_with_prose() {
        let messages = long_conversation(6);
        let mut builder = ContextBuilder::new(ContextLimits {
            max_collapsed_history_chars: 500,
            min_collapsed_history_chars: 300,
            ..ContextLimits::default()
        });
        let prepared = builder.build(&messages, &FileCache::new()).unwrap();

        let history = prepared.messages();
        assert_eq!(history[1].role(), Role::System);
        assert_eq!(history[1].text_content(), "Step 0.");
        // The trailing window starting at the last user message is verbatim.
        let last = history.last().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert!(last.text_content().contains("<artifact"));
        assert!(prepared.usage().collapsed_messages > 0);
    }

    #[test]
    fn collapse_cutoff_is_sticky() {
        let mut messages = long_conversation(6);
        let mut builder = ContextBuilder::new(ContextLimits {
            max_collapsed_history_chars: 500,
            min_collapsed_history_chars: 300,
            ..ContextLimits::default()
        });
        builder.build(&messages, &FileCache::new()).unwrap();
        let first = builder.collapse_cutoff();
        assert!(first > 0);

        // A small addition stays under the high-water mark: cutoff holds.
        messages.push(Message::user(MessageId::new("u-next"), "ok", AT));
        builder.build(&messages, &FileCache::new()).unwrap();
        assert_eq!(builder.collapse_cutoff(), first);
    }

    #[test]
    fn small_budget_collapses_instead_of_failing() {
        let messages = long_conversation(10);
        let mut builder = ContextBuilder::new(ContextLimits {
            max_chars: 1000,
            ..ContextLimits::default()
        });
        let prepared = builder.build(&messages, &FileCache::new()).unwrap();
        assert!(builder.collapse_cutoff() > 0);
        assert!(prepared.usage().used_chars <= 1000);
        assert!(prepared.messages().last().unwrap().text_content().contains("<artifact"));
    }

    #[test]
    fn collapse_disabled_keeps_everything() {
        let messages = long_conversation(6);
        let mut builder = ContextBuilder::new(ContextLimits {
            collapse: false,
            max_collapsed_history_chars: 10,
            min_collapsed_history_chars: 5,
            ..ContextLimits::default()
        });
        let prepared = builder.build(&messages, &FileCache::new()).unwrap();
        assert_eq!(prepared.usage().collapsed_messages, 0);
        assert_eq!(prepared.messages().len(), messages.len());
    }

    #[test]
    fn history_over_budget_is_an_error() {
        let messages = vec![Message::user(MessageId::new("u"), "x".repeat(50), AT)];
        let mut builder = ContextBuilder::new(ContextLimits {
            max_chars: 10,
            ..ContextLimits::default()
        });
        assert_eq!(
            builder.build(&messages, &FileCache::new()).unwrap_err(),
            ContextBuildError::RecentMessagesTooLarge {
                required_chars: 50,
                budget_chars: 10,
                message_count: 1,
            }
        );
    }
}
