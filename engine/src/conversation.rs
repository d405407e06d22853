//! Conversation store.
//!
//! Holds the message list and publishes progress over a `watch` channel: the
//! active and latest sub-conversation indices and the last part known to be
//! complete. Streaming deltas do not touch the channel; only completions do.

use std::sync::{PoisonError, RwLock};

use shipwright_types::{Message, Role};
use tokio::sync::watch;

/// Address of a part within the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartPosition {
    pub message_index: usize,
    pub part_index: usize,
}

impl PartPosition {
    #[must_use]
    pub const fn new(message_index: usize, part_index: usize) -> Self {
        Self {
            message_index,
            part_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatProgress {
    /// History has been loaded; before this nothing should be persisted.
    pub initialized: bool,
    pub subchat_index: u32,
    pub latest_subchat_index: u32,
    pub last_complete: Option<PartPosition>,
}

impl ChatProgress {
    /// The active sub-conversation is the newest one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.initialized && self.subchat_index == self.latest_subchat_index
    }
}

#[derive(Debug)]
pub struct Conversation {
    messages: RwLock<Vec<Message>>,
    progress: watch::Sender<ChatProgress>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn last_part_of(messages: &[Message]) -> Option<PartPosition> {
    messages.iter().enumerate().rev().find_map(|(i, msg)| {
        msg.parts()
            .len()
            .checked_sub(1)
            .map(|last| PartPosition::new(i, last))
    })
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        let (progress, _) = watch::channel(ChatProgress::default());
        Self {
            messages: RwLock::new(Vec::new()),
            progress,
        }
    }

    /// Replace the history with `messages`, all of them complete.
    pub fn load(&self, messages: Vec<Message>, subchat_index: u32) {
        let last = last_part_of(&messages);
        *self.messages.write().unwrap_or_else(PoisonError::into_inner) = messages;
        self.progress.send_modify(|p| {
            p.initialized = true;
            p.subchat_index = subchat_index;
            p.latest_subchat_index = p.latest_subchat_index.max(subchat_index);
            p.last_complete = last;
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatProgress> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn progress(&self) -> ChatProgress {
        *self.progress.borrow()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn with_messages<R>(&self, f: impl FnOnce(&[Message]) -> R) -> R {
        f(&self.messages.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with_messages(<[Message]>::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a message. Everything before it is complete; a non-assistant
    /// message is complete as soon as it lands.
    pub fn push_message(&self, message: Message) -> usize {
        let streaming = message.role() == Role::Assistant;
        let (index, completed) = {
            let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
            messages.push(message);
            let index = messages.len() - 1;
            let completed = if streaming {
                last_part_of(&messages[..index])
            } else {
                last_part_of(&messages)
            };
            (index, completed)
        };
        self.advance(completed);
        index
    }

    /// Mutate the trailing message in place. Every part but its last is
    /// considered complete afterwards.
    pub fn update_last<R>(&self, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        let (out, completed) = {
            let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
            let index = messages.len().checked_sub(1)?;
            let out = f(&mut messages[index]);
            let parts = messages[index].parts().len();
            let completed = parts
                .checked_sub(2)
                .map(|part| PartPosition::new(index, part));
            (out, completed)
        };
        self.advance(completed);
        Some(out)
    }

    /// The trailing message is done streaming.
    pub fn finish_last(&self) {
        let completed = self.with_messages(last_part_of);
        self.advance(completed);
    }

    /// Switch the active sub-conversation. Rewinding to an earlier one is how
    /// a user edits history; the completion watermark restarts from the new
    /// history.
    pub fn set_subchat(&self, index: u32) {
        let last = self.with_messages(last_part_of);
        self.progress.send_if_modified(|p| {
            if p.subchat_index == index {
                return false;
            }
            p.subchat_index = index;
            p.latest_subchat_index = p.latest_subchat_index.max(index);
            p.last_complete = last;
            true
        });
    }

    pub fn set_latest_subchat(&self, index: u32) {
        self.progress.send_if_modified(|p| {
            let changed = p.latest_subchat_index != index;
            p.latest_subchat_index = index;
            changed
        });
    }

    /// History through `upto`, the last message truncated after that part.
    #[must_use]
    pub fn messages_through(&self, upto: PartPosition) -> Vec<Message> {
        self.with_messages(|messages| {
            let end = (upto.message_index + 1).min(messages.len());
            let mut out = messages[..end].to_vec();
            if let Some(last) = out.last_mut()
                && end == upto.message_index + 1
                && last.parts().len() > upto.part_index + 1
            {
                let parts = last.parts()[..=upto.part_index].to_vec();
                *last = Message::new(last.id().clone(), last.role(), parts, last.created_at());
            }
            out
        })
    }

    fn advance(&self, completed: Option<PartPosition>) {
        let Some(completed) = completed else {
            return;
        };
        self.progress.send_if_modified(|p| {
            if p.last_complete.is_some_and(|current| current >= completed) {
                return false;
            }
            p.last_complete = Some(completed);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_types::{MessageId, Part};
    use std::time::SystemTime;

    fn user(id: &str) -> Message {
        Message::user(MessageId::new(id), "hi", SystemTime::UNIX_EPOCH)
    }

    fn assistant(id: &str) -> Message {
        Message::assistant(MessageId::new(id), SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn completion_tracks_parts_behind_the_streaming_one() {
        let conversation = Conversation::new();
        conversation.load(Vec::new(), 0);
        conversation.push_message(user("u"));
        assert_eq!(
            conversation.progress().last_complete,
            Some(PartPosition::new(0, 0))
        );

        conversation.push_message(assistant("a"));
        conversation.update_last(|m| m.append_text("hello"));
        assert_eq!(
            conversation.progress().last_complete,
            Some(PartPosition::new(0, 0))
        );

        conversation.update_last(|m| m.push_part(Part::Reasoning { text: "..".into() }));
        assert_eq!(
            conversation.progress().last_complete,
            Some(PartPosition::new(1, 0))
        );

        conversation.finish_last();
        assert_eq!(
            conversation.progress().last_complete,
            Some(PartPosition::new(1, 1))
        );
    }

    #[tokio::test]
    async fn streaming_deltas_do_not_notify() {
        let conversation = Conversation::new();
        conversation.load(vec![user("u")], 0);
        let rx = conversation.subscribe();

        conversation.push_message(assistant("a"));
        conversation.update_last(|m| m.append_text("a"));
        conversation.update_last(|m| m.append_text("b"));
        assert!(!rx.has_changed().unwrap());

        conversation.finish_last();
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn messages_through_truncates_trailing_message() {
        let conversation = Conversation::new();
        let mut msg = assistant("a");
        msg.append_text("one");
        msg.push_part(Part::Reasoning { text: "r".into() });
        msg.append_text("two");
        conversation.load(vec![user("u"), msg], 0);

        let through = conversation.messages_through(PartPosition::new(1, 0));
        assert_eq!(through.len(), 2);
        assert_eq!(through[1].parts().len(), 1);
        assert_eq!(conversation.messages_through(PartPosition::new(0, 0)).len(), 1);
    }

    #[test]
    fn subchat_switch_marks_progress_not_current_until_caught_up() {
        let conversation = Conversation::new();
        conversation.load(vec![user("u")], 0);
        assert!(conversation.progress().is_current());
        conversation.set_latest_subchat(1);
        assert!(!conversation.progress().is_current());
        conversation.set_subchat(1);
        assert!(conversation.progress().is_current());
    }
}
