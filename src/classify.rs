//! Keyword classification of page text.
//!
//! The decision table is [`RULES`]: an ordered list of keyword predicates,
//! each tied to a category and its description templates. The first rule
//! whose keywords occur in the lower-cased text wins, so the order of the
//! table is part of the contract. External-identifier extraction is an
//! independent regex match and never influences the category.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::{Category, Classification};

/// Release document numbers: a literal prefix followed by eight digits.
pub const EXTERNAL_ID_PATTERN: &str = r"EFTA\d{8}";

/// How a rule derives its context line.
enum ContextRule {
    Fixed(&'static str),
    /// First matching keyword group selects the context; none matching leaves it empty.
    Refined(&'static [(&'static [&'static str], &'static str)]),
}

struct Rule {
    category: Category,
    keywords: &'static [&'static str],
    context: ContextRule,
    description: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        category: Category::Photo,
        keywords: &["photograph", "photo", "image", "picture"],
        context: ContextRule::Refined(&[
            (
                &["clinton"],
                "Contains images potentially related to Bill Clinton",
            ),
            (&["epstein"], "Contains images related to Jeffrey Epstein"),
            (
                &["flight", "airplane"],
                "Contains flight-related photographs",
            ),
        ]),
        description: "Photograph page",
    },
    Rule {
        category: Category::FlightLog,
        keywords: &[
            "flight log",
            "aircraft",
            "passenger manifest",
            "lolita express",
        ],
        context: ContextRule::Fixed("Flight log or passenger manifest"),
        description: "Flight log document",
    },
    Rule {
        category: Category::Contact,
        keywords: &["contact", "address book", "phone", "email address"],
        context: ContextRule::Fixed("Contact information or address book entry"),
        description: "Contact information page",
    },
    Rule {
        category: Category::Financial,
        keywords: &["bank", "transaction", "wire transfer", "payment", "check"],
        context: ContextRule::Fixed("Financial transaction or banking document"),
        description: "Financial document",
    },
    Rule {
        category: Category::Email,
        keywords: &["from:", "to:", "subject:", "sent:", "email"],
        context: ContextRule::Fixed("Email correspondence"),
        description: "Email document",
    },
    Rule {
        category: Category::Legal,
        keywords: &[
            "court",
            "judge",
            "plaintiff",
            "defendant",
            "deposition",
            "affidavit",
        ],
        context: ContextRule::Fixed("Legal document or court filing"),
        description: "Legal document",
    },
    Rule {
        category: Category::Calendar,
        keywords: &["appointment", "schedule", "calendar", "meeting"],
        context: ContextRule::Fixed("Calendar or scheduling information"),
        description: "Calendar/schedule page",
    },
    Rule {
        category: Category::Medical,
        keywords: &["medical", "prescription", "doctor", "hospital", "diagnosis"],
        context: ContextRule::Fixed("Medical record or health information"),
        description: "Medical document",
    },
    Rule {
        category: Category::Redacted,
        keywords: &["redacted", "withheld", "privileged", "confidential"],
        context: ContextRule::Fixed("Page contains redacted information"),
        description: "Redacted document page",
    },
];

fn external_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EXTERNAL_ID_PATTERN).expect("external id pattern is valid"))
}

/// Returns the first external identifier in `text`, if any.
pub fn extract_external_id(text: &str) -> Option<String> {
    external_id_regex()
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Classifies raw page text. Total and deterministic: absent or unmatched
/// text yields [`Category::Unknown`] with no context or description.
pub fn classify(raw_text: Option<&str>) -> Classification {
    let text = raw_text.unwrap_or_default();
    let external_id = extract_external_id(text);

    if text.trim().is_empty() {
        return unknown(external_id);
    }

    let lower = text.to_lowercase();
    for rule in RULES {
        if rule.keywords.iter().any(|kw| lower.contains(kw)) {
            let context = match &rule.context {
                ContextRule::Fixed(s) => Some(s.to_string()),
                ContextRule::Refined(options) => options
                    .iter()
                    .find(|(terms, _)| terms.iter().any(|t| lower.contains(t)))
                    .map(|(_, s)| s.to_string()),
            };
            return Classification {
                category: rule.category,
                context,
                description: Some(rule.description.to_string()),
                external_id,
            };
        }
    }

    unknown(external_id)
}

fn unknown(external_id: Option<String>) -> Classification {
    Classification {
        category: Category::Unknown,
        context: None,
        description: None,
        external_id,
    }
}
