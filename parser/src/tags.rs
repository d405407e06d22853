//! Tag recognition shared by the streaming parser and `strip_markup`.
//!
//! Every matcher answers with `Incomplete` when the input ends while the text
//! could still become the tag. Callers stop there and retry once more input
//! arrives, which is what makes prefix parsing agree with whole-buffer parsing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

pub(crate) const ARTIFACT_OPEN: &str = "<artifact";
pub(crate) const ARTIFACT_CLOSE: &str = "</artifact>";
pub(crate) const ACTION_OPEN: &str = "<action";
pub(crate) const ACTION_CLOSE: &str = "</action>";

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][-A-Za-z0-9_]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Attributes(HashMap<String, String>);

impl Attributes {
    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn parse(raw: &str) -> Self {
        let map = ATTRIBUTE
            .captures_iter(raw)
            .filter_map(|caps| {
                let name = caps.get(1)?.as_str().to_string();
                let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
                Some((name, unescape_attribute(value)))
            })
            .collect();
        Self(map)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TagMatch {
    /// The tag is fully present; `end` is the byte offset just past it.
    Complete { end: usize, attributes: Attributes },
    /// The input ends inside something that may still become the tag.
    Incomplete,
    NoMatch,
}

/// Match an opening tag such as `<artifact id="a">` starting at `at`.
pub(crate) fn match_open_tag(input: &str, at: usize, name: &str) -> TagMatch {
    let rest = &input[at..];
    if rest.len() < name.len() {
        return if name.starts_with(rest) {
            TagMatch::Incomplete
        } else {
            TagMatch::NoMatch
        };
    }
    if !rest.starts_with(name) {
        return TagMatch::NoMatch;
    }

    let after_name = &rest[name.len()..];
    match after_name.chars().next() {
        None => return TagMatch::Incomplete,
        Some(c) if c.is_whitespace() || c == '>' => {}
        Some(_) => return TagMatch::NoMatch,
    }

    let mut quote: Option<char> = None;
    for (offset, c) in after_name.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), c) if c == open => quote = None,
            (None, '>') => {
                return TagMatch::Complete {
                    end: at + name.len() + offset + 1,
                    attributes: Attributes::parse(&after_name[..offset]),
                };
            }
            _ => {}
        }
    }
    TagMatch::Incomplete
}

/// Match a literal closing tag at `at`.
pub(crate) fn match_literal(input: &str, at: usize, literal: &str) -> TagMatch {
    let rest = &input[at..];
    if rest.starts_with(literal) {
        TagMatch::Complete {
            end: at + literal.len(),
            attributes: Attributes::default(),
        }
    } else if literal.starts_with(rest) {
        TagMatch::Incomplete
    } else {
        TagMatch::NoMatch
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
///
/// Streamed content holds back this many bytes so a half-arrived closing tag
/// never shows up as file content.
pub(crate) fn partial_suffix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

pub(crate) fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_attribute(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_tag_with_attributes() {
        let input = r#"<artifact id="a" title='My "App"'>rest"#;
        match match_open_tag(input, 0, ARTIFACT_OPEN) {
            TagMatch::Complete { end, attributes } => {
                assert_eq!(&input[end..], "rest");
                assert_eq!(attributes.get("id"), Some("a"));
                assert_eq!(attributes.get("title"), Some("My \"App\""));
            }
            other => panic!("expected complete tag, got {other:?}"),
        }
    }

    #[test]
    fn open_tag_prefixes_are_incomplete() {
        let full = r#"<action type="file" path="a>b.ts">"#;
        for end in 1..full.len() {
            assert_eq!(
                match_open_tag(&full[..end], 0, ACTION_OPEN),
                TagMatch::Incomplete,
                "prefix {:?}",
                &full[..end]
            );
        }
        assert!(matches!(
            match_open_tag(full, 0, ACTION_OPEN),
            TagMatch::Complete { .. }
        ));
    }

    #[test]
    fn similar_names_do_not_match() {
        assert_eq!(
            match_open_tag("<artifacts>", 0, ARTIFACT_OPEN),
            TagMatch::NoMatch
        );
        assert_eq!(match_open_tag("<div>", 0, ARTIFACT_OPEN), TagMatch::NoMatch);
        assert_eq!(match_open_tag("<", 0, ARTIFACT_OPEN), TagMatch::Incomplete);
    }

    #[test]
    fn literal_matching() {
        assert!(matches!(
            match_literal("</action>x", 0, ACTION_CLOSE),
            TagMatch::Complete { end: 9, .. }
        ));
        assert_eq!(match_literal("</act", 0, ACTION_CLOSE), TagMatch::Incomplete);
        assert_eq!(match_literal("</div>", 0, ACTION_CLOSE), TagMatch::NoMatch);
    }

    #[test]
    fn partial_suffix_detection() {
        assert_eq!(partial_suffix_len("code</ac", ACTION_CLOSE), 4);
        assert_eq!(partial_suffix_len("a < b", ACTION_CLOSE), 0);
        assert_eq!(partial_suffix_len("x <", ACTION_CLOSE), 1);
    }

    #[test]
    fn attribute_escaping_round_trips() {
        let raw = r#"a "quoted" <b> & c"#;
        let tag = format!("<artifact title=\"{}\">", escape_attribute(raw));
        match match_open_tag(&tag, 0, ARTIFACT_OPEN) {
            TagMatch::Complete { attributes, .. } => {
                assert_eq!(attributes.get("title"), Some(raw));
            }
            other => panic!("expected complete tag, got {other:?}"),
        }
    }
}
