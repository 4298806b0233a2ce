//! Intent vocabulary and priority-based resolution.
//!
//! Classification returns one or more labels from a closed vocabulary; a
//! static priority table reduces them to exactly one. The table is data, not
//! branching, so the tie-break policy can be swapped without touching the
//! resolution code.

use serde::{Deserialize, Serialize};

/// A user-turn intent from the closed classification vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Request to generate new code.
    Generation,
    /// Request to improve existing code.
    Optimization,
    /// Request to fix a bug.
    Debugging,
    /// Request to write or discuss test cases.
    TestCase,
    /// Constraints or requirements being laid down.
    RuleSetting,
    /// Role or persona definition for the assistant.
    SystemPrompt,
    /// A question or hint request.
    HintOrQuery,
    /// A follow-up on an earlier turn.
    FollowUp,
}

/// Priority table for multi-label resolution. Lower rank wins.
///
/// Generation outranks everything: when a turn both sets rules and asks for
/// code, the code request is what gets scored.
pub const INTENT_PRIORITY: &[(Intent, u8)] = &[
    (Intent::Generation, 1),
    (Intent::Optimization, 2),
    (Intent::Debugging, 3),
    (Intent::TestCase, 4),
    (Intent::RuleSetting, 5),
    (Intent::SystemPrompt, 6),
    (Intent::HintOrQuery, 7),
    (Intent::FollowUp, 8),
];

impl Intent {
    /// All intents, in priority order.
    pub const ALL: [Intent; 8] = [
        Intent::Generation,
        Intent::Optimization,
        Intent::Debugging,
        Intent::TestCase,
        Intent::RuleSetting,
        Intent::SystemPrompt,
        Intent::HintOrQuery,
        Intent::FollowUp,
    ];

    /// The wire label for this intent (matches the classifier vocabulary).
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Generation => "GENERATION",
            Intent::Optimization => "OPTIMIZATION",
            Intent::Debugging => "DEBUGGING",
            Intent::TestCase => "TEST_CASE",
            Intent::RuleSetting => "RULE_SETTING",
            Intent::SystemPrompt => "SYSTEM_PROMPT",
            Intent::HintOrQuery => "HINT_OR_QUERY",
            Intent::FollowUp => "FOLLOW_UP",
        }
    }

    /// Parses a wire label, returning `None` for anything outside the
    /// closed vocabulary.
    pub fn from_label(label: &str) -> Option<Intent> {
        match label.trim().to_ascii_uppercase().as_str() {
            "GENERATION" => Some(Intent::Generation),
            "OPTIMIZATION" => Some(Intent::Optimization),
            "DEBUGGING" => Some(Intent::Debugging),
            "TEST_CASE" => Some(Intent::TestCase),
            "RULE_SETTING" => Some(Intent::RuleSetting),
            "SYSTEM_PROMPT" => Some(Intent::SystemPrompt),
            "HINT_OR_QUERY" => Some(Intent::HintOrQuery),
            "FOLLOW_UP" => Some(Intent::FollowUp),
            _ => None,
        }
    }

    /// Rank in the priority table; unknown entries sink to the bottom.
    pub fn priority(&self) -> u8 {
        INTENT_PRIORITY
            .iter()
            .find(|(intent, _)| intent == self)
            .map(|(_, rank)| *rank)
            .unwrap_or(u8::MAX)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolves a label set to exactly one intent using the priority table.
///
/// Returns `None` only for an empty set; the classifier contract requires a
/// non-empty set, so callers treat `None` as a schema failure.
pub fn resolve(labels: &[Intent]) -> Option<Intent> {
    labels.iter().copied().min_by_key(Intent::priority)
}
