//! Keyword detection of named people in page text.
//!
//! This is a plain pattern scan, not entity recognition: a fixed list of
//! full names, tolerant of arbitrary whitespace between first and last name.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const KNOWN_PEOPLE: &[(&str, &str)] = &[
    (r"(?i)\bbill\s+clinton\b", "Bill Clinton"),
    (r"(?i)\bjeffrey\s+epstein\b", "Jeffrey Epstein"),
    (r"(?i)\bdonald\s+trump\b", "Donald Trump"),
    (r"(?i)\bghislaine\s+maxwell\b", "Ghislaine Maxwell"),
    (r"(?i)\bprince\s+andrew\b", "Prince Andrew"),
    (r"(?i)\bbill\s+gates\b", "Bill Gates"),
    (r"(?i)\bmichael\s+jackson\b", "Michael Jackson"),
    (r"(?i)\bkevin\s+spacey\b", "Kevin Spacey"),
    (r"(?i)\bwalter\s+cronkite\b", "Walter Cronkite"),
];

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        KNOWN_PEOPLE
            .iter()
            .map(|(pattern, name)| {
                (
                    Regex::new(pattern).expect("people pattern must compile"),
                    *name,
                )
            })
            .collect()
    })
}

/// Returns the canonical names mentioned in `text`, sorted and de-duplicated.
pub fn detect_people(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let found: BTreeSet<&str> = patterns()
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, name)| *name)
        .collect();
    found.into_iter().map(str::to_string).collect()
}
