//! Plain-text rendering of HTML mail bodies.
//!
//! The conversion is shallow: block-closing tags become line
//! breaks, `<style>` and `<script>` elements disappear with their content, every
//! other tag is dropped while its text is kept, and whitespace is collapsed.
//! Entities such as `&amp;` are left as they are.

use regex::Regex;
use std::sync::LazyLock;

static LINE_BREAK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(?:h[0-9]|p|td|tr|div)>|<br[^>]*>").expect("line break pattern")
});

static RAW_TEXT_OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(style|script)[^>]*>").expect("raw text pattern"));

// An unterminated tag runs to the end of the input.
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[^>]+(?:>|$)").expect("tag pattern"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("whitespace pattern"));

static NEWLINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("newline pattern"));

/// Derives the `text/plain` alternative of an HTML body.
pub fn html_to_text(html: &str) -> String {
    let with_line_breaks = LINE_BREAK_TAGS.replace_all(html, "\n");
    let without_raw_text = strip_raw_text_elements(&with_line_breaks);
    let without_tags = ANY_TAG.replace_all(&without_raw_text, "");

    collapse_until_stable(without_tags.into_owned())
        .trim()
        .to_string()
}

/// Removes `<style>` and `<script>` elements including their content.
///
/// The closing tag has to name the same element as the opening one. An opening
/// tag without a matching close is left for the generic tag stripping.
fn strip_raw_text_elements(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets identical to `html`.
    let lowered = html.to_ascii_lowercase();
    let mut output = String::with_capacity(html.len());
    let mut copied_to = 0;
    let mut search_from = 0;
    // Element names with no closing tag past the current offset. Once a search
    // fails it fails for every later offset too, so it is never repeated.
    let mut unclosed: Vec<String> = Vec::new();

    while let Some(captures) = RAW_TEXT_OPEN_TAG.captures_at(html, search_from) {
        let (Some(open_tag), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let name = name.as_str().to_ascii_lowercase();

        if !unclosed.contains(&name) {
            let closing = format!("</{name}>");
            if let Some(offset) = lowered[open_tag.end()..].find(&closing) {
                output.push_str(&html[copied_to..open_tag.start()]);
                copied_to = open_tag.end() + offset + closing.len();
                search_from = copied_to;
                continue;
            }
            unclosed.push(name);
        }

        search_from = open_tag.end();
    }

    output.push_str(&html[copied_to..]);
    output
}

fn collapse_once(text: &str) -> String {
    let spaces = WHITESPACE_RUN.replace_all(text, " ");
    NEWLINE_RUN.replace_all(&spaces, "\n").into_owned()
}

/// Collapses whitespace and newline runs until a pass changes nothing.
///
/// Terminates: every pass that changes the text replaces a run of at least two
/// characters with a single one, so the text gets strictly shorter.
pub fn collapse_until_stable(text: String) -> String {
    let mut current = text;
    loop {
        let next = collapse_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}
