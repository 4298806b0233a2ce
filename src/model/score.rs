//! Holistic and final score records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whole-session evaluation across turns, produced once per session after
/// the guard reports completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolisticResult {
    /// How well the user broke the problem into sub-problems, 0-100.
    pub decomposition: f64,
    /// How well feedback from earlier replies was integrated, 0-100.
    pub feedback_integration: f64,
    /// Initiative shown in driving toward a solution, 0-100.
    pub initiative: f64,
    /// Breadth and quality of strategies explored, 0-100.
    pub strategic_exploration: f64,
    /// Bonus for notable prompting technique, 0-100.
    pub technique_bonus: f64,
    /// Overall cross-turn score, 0-100.
    pub overall: f64,
    /// Free-text analysis of the session.
    pub analysis: String,
}

impl HolisticResult {
    /// Fallback when the holistic call cannot be completed: the overall
    /// score degrades to the turn mean so finalize can still proceed.
    pub fn fallback(turn_mean: f64) -> Self {
        Self {
            decomposition: 0.0,
            feedback_integration: 0.0,
            initiative: 0.0,
            strategic_exploration: 0.0,
            technique_bonus: 0.0,
            overall: turn_mean,
            analysis: String::new(),
        }
    }
}

/// Letter grade from the fixed threshold table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Threshold lookup: 90/80/70/60.
    pub fn from_total(total: f64) -> Self {
        if total >= 90.0 {
            Grade::A
        } else if total >= 80.0 {
            Grade::B
        } else if total >= 70.0 {
            Grade::C
        } else if total >= 60.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable final grade for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalScore {
    /// Session this score belongs to.
    pub session_id: Uuid,
    /// Prompt-quality dimension (holistic + turn mean), 0-100.
    pub prompt_score: f64,
    /// Execution performance dimension, 0-100.
    pub performance_score: f64,
    /// Execution correctness dimension, 0-100.
    pub correctness_score: f64,
    /// Weighted total, 0-100.
    pub total: f64,
    /// Letter grade.
    pub grade: Grade,
    /// False when some turns finalized unscored; recorded for transparency.
    pub all_turns_scored: bool,
    /// When the score was assembled.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_total(100.0), Grade::A);
        assert_eq!(Grade::from_total(90.0), Grade::A);
        assert_eq!(Grade::from_total(89.99), Grade::B);
        assert_eq!(Grade::from_total(80.0), Grade::B);
        assert_eq!(Grade::from_total(70.0), Grade::C);
        assert_eq!(Grade::from_total(60.0), Grade::D);
        assert_eq!(Grade::from_total(59.99), Grade::F);
        assert_eq!(Grade::from_total(0.0), Grade::F);
    }

    #[test]
    fn test_holistic_fallback_uses_turn_mean() {
        let fallback = HolisticResult::fallback(72.5);
        assert_eq!(fallback.overall, 72.5);
        assert!(fallback.analysis.is_empty());
    }
}
