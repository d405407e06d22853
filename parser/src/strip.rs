use std::borrow::Cow;

use crate::tags::{ARTIFACT_CLOSE, ARTIFACT_OPEN, TagMatch, match_open_tag};

/// Remove artifact blocks from assistant text, leaving only the prose.
///
/// An artifact that never closes is removed through the end of the text.
/// Text outside artifacts, including stray `<` and unrelated tags, is returned
/// byte-for-byte.
#[must_use]
pub fn strip_markup(text: &str) -> Cow<'_, str> {
    let mut out: Option<String> = None;
    let mut copied_to = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('<') {
        let at = cursor + offset;
        let TagMatch::Complete { end, .. } = match_open_tag(text, at, ARTIFACT_OPEN) else {
            cursor = at + 1;
            continue;
        };
        let block_end = text[end..]
            .find(ARTIFACT_CLOSE)
            .map_or(text.len(), |close| end + close + ARTIFACT_CLOSE.len());

        out.get_or_insert_with(|| String::with_capacity(text.len()))
            .push_str(&text[copied_to..at]);
        copied_to = block_end;
        cursor = block_end;
        if cursor >= text.len() {
            break;
        }
    }

    match out {
        None => Cow::Borrowed(text),
        Some(mut stripped) => {
            stripped.push_str(&text[copied_to..]);
            Cow::Owned(stripped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_markup() {
        let samples = [
            "",
            "plain prose",
            "a < b && c > d",
            "<div class=\"x\">html-ish</div>",
            "<artifacts> is not a tag we know",
            "dangling <artifact id=\"a\"",
            "unicode ✓ <✗>",
        ];
        for sample in samples {
            assert!(matches!(strip_markup(sample), Cow::Borrowed(s) if s == sample));
        }
    }

    #[test]
    fn removes_complete_artifacts() {
        let text = r#"Before <artifact id="a" title="T"><action type="file" path="x.ts">x</action></artifact> after"#;
        assert_eq!(strip_markup(text), "Before  after");
    }

    #[test]
    fn removes_unclosed_artifact_to_end() {
        let text = r#"Working on it. <artifact id="a"><action type="file" path="x.ts">partial"#;
        assert_eq!(strip_markup(text), "Working on it. ");
    }

    #[test]
    fn removes_multiple_artifacts() {
        let text = "a<artifact>1</artifact>b<artifact>2</artifact>c";
        assert_eq!(strip_markup(text), "abc");
    }
}
