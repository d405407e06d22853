//! One-shot helpers over complete parts.

use shipwright_types::{Action, InvalidAction, Message, Part, PartId, Role};

use crate::parser::{ParserEvent, StreamingParser};
use crate::render::part_markup;

/// Every action closed in `part`, in order.
#[must_use]
pub fn extract_actions(part_id: &PartId, part: &Part) -> Vec<Result<Action, InvalidAction>> {
    let Some(markup) = part_markup(part_id, part) else {
        return Vec::new();
    };
    StreamingParser::new()
        .parse(part_id, &markup)
        .into_iter()
        .filter_map(|event| match event {
            ParserEvent::ActionClose { action, .. } => Some(action),
            _ => None,
        })
        .collect()
}

/// Paths written by the valid actions of `part`, in order.
#[must_use]
pub fn written_paths(part_id: &PartId, part: &Part) -> Vec<String> {
    extract_actions(part_id, part)
        .into_iter()
        .filter_map(|action| action.ok()?.written_path().map(str::to_string))
        .collect()
}

/// Title of the first artifact in any assistant text part.
#[must_use]
pub fn first_artifact_title(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .filter(|message| message.role() == Role::Assistant)
        .flat_map(|message| {
            message
                .parts()
                .iter()
                .enumerate()
                .filter(|(_, part)| matches!(part, Part::Text { .. }))
                .map(move |(index, part)| (message.part_id(index), part))
        })
        .find_map(|(part_id, part)| {
            let text = part.as_text()?;
            StreamingParser::new()
                .parse(&part_id, text)
                .into_iter()
                .find_map(|event| match event {
                    ParserEvent::ArtifactOpen { title, .. } if !title.trim().is_empty() => {
                        Some(title)
                    }
                    _ => None,
                })
        })
}
