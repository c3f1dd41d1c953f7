//! Message triage: keyword-based urgency scoring.

pub mod classifier;
pub mod samples;

pub use classifier::{Classification, KeywordMatch, PriorityTier, classify, priority_label, score};
