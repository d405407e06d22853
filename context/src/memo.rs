//! Per-part memoization of parse results and size estimates.
//!
//! A part is only re-parsed when its markup length changed since the last
//! visit. Completed parts never change, so steady-state lookups are O(1).

use std::collections::HashMap;

use shipwright_parser::{part_markup, strip_markup, written_paths};
use shipwright_types::{Part, PartId};

#[derive(Debug, Clone)]
struct PartMemo {
    markup_len: usize,
    written: Vec<String>,
    full_chars: usize,
    prose_chars: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PartCache {
    parts: HashMap<PartId, PartMemo>,
    hits: u64,
    misses: u64,
}

impl PartCache {
    fn entry(&mut self, part_id: &PartId, part: &Part) -> &PartMemo {
        let markup = part_markup(part_id, part);
        let markup_len = markup.as_ref().map_or(0, |m| m.len());

        let fresh = self
            .parts
            .get(part_id)
            .is_some_and(|memo| memo.markup_len == markup_len);
        if fresh {
            self.hits += 1;
        } else {
            self.misses += 1;
            let (full_chars, prose_chars) = match (&markup, part) {
                (Some(markup), Part::Text { .. }) => (
                    markup.chars().count(),
                    strip_markup(markup).chars().count(),
                ),
                (Some(markup), _) => (markup.chars().count(), 0),
                (None, Part::Reasoning { text }) => (text.chars().count(), 0),
                (None, _) => (0, 0),
            };
            self.parts.insert(
                part_id.clone(),
                PartMemo {
                    markup_len,
                    written: written_paths(part_id, part),
                    full_chars,
                    prose_chars,
                },
            );
        }
        &self.parts[part_id]
    }

    pub(crate) fn written_paths(&mut self, part_id: &PartId, part: &Part) -> &[String] {
        &self.entry(part_id, part).written
    }

    /// Characters the part contributes when sent verbatim.
    pub(crate) fn full_chars(&mut self, part_id: &PartId, part: &Part) -> usize {
        self.entry(part_id, part).full_chars
    }

    /// Characters the part contributes once collapsed to prose.
    pub(crate) fn prose_chars(&mut self, part_id: &PartId, part: &Part) -> usize {
        self.entry(part_id, part).prose_chars
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
