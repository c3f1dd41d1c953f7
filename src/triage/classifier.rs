//! Priority classifier for incoming customer messages.
//!
//! Three fixed keyword tiers, matched as case-insensitive substrings:
//! - HIGH (3): loan approval/disbursement and generic urgency words
//! - MEDIUM (2): status and timeline inquiries
//! - LOW (1): how-to and change requests
//!
//! Every tier is checked on every call so diagnostics see the full set of
//! matched phrases, not just the winning tier. There is no word-boundary
//! logic: "update" matches inside "updated".

use std::fmt;

use serde::Serialize;

/// A keyword tier and the priority it raises a message to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl PriorityTier {
    /// All tiers, highest first.
    pub const ALL: [PriorityTier; 3] = [Self::High, Self::Medium, Self::Low];

    /// Numeric priority assigned by this tier.
    pub fn priority(self) -> u8 {
        self as u8
    }

    /// The fixed keyword phrases for this tier (already lower-case).
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::High => HIGH_KEYWORDS,
            Self::Medium => MEDIUM_KEYWORDS,
            Self::Low => LOW_KEYWORDS,
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

const HIGH_KEYWORDS: &[&str] = &[
    "loan approval",
    "loan disbursed",
    "disbursement",
    "approval process",
    "urgent",
    "asap",
    "immediately",
    "critical",
    "emergency",
];

const MEDIUM_KEYWORDS: &[&str] = &["status", "update", "when", "how long", "timeline"];

const LOW_KEYWORDS: &[&str] = &["how to", "update information", "change", "modify"];

/// One keyword phrase found in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordMatch {
    pub tier: PriorityTier,
    pub keyword: &'static str,
}

impl fmt::Display for KeywordMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}'", self.tier, self.keyword)
    }
}

/// Result of classifying a message: the score plus every phrase that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub priority: u8,
    pub matches: Vec<KeywordMatch>,
}

impl Classification {
    /// Human-readable label for the priority, as shown in the diagnostic harness.
    pub fn label(&self) -> &'static str {
        priority_label(self.priority)
    }
}

/// Label for a numeric priority.
pub fn priority_label(priority: u8) -> &'static str {
    match priority {
        3 => "High/Urgent",
        2 => "Medium",
        1 => "Low",
        _ => "None (Default)",
    }
}

/// Classify `text`, returning the priority and all matched keywords in tier
/// order (HIGH, MEDIUM, LOW), then keyword order.
pub fn classify(text: &str) -> Classification {
    let lowered = text.to_lowercase();
    let mut priority = 0u8;
    let mut matches = Vec::new();

    for tier in PriorityTier::ALL {
        for &keyword in tier.keywords() {
            if lowered.contains(keyword) {
                priority = priority.max(tier.priority());
                matches.push(KeywordMatch { tier, keyword });
            }
        }
    }

    Classification { priority, matches }
}

/// Urgency score in `0..=3` for `text`.
pub fn score(text: &str) -> u8 {
    classify(text).priority
}
