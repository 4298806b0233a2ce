//! Turn records and evaluation status.
//!
//! A `Turn` is one user-input/reply pair. Its content fields (`input`,
//! `reply`, `blocked`) are written once at acceptance and never change;
//! evaluation writes only status, score, rubric and rationale. That split is
//! what makes late or repeated evaluation writes harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::intent::Intent;

/// Evaluation status of a turn. Transitions are monotonic:
/// `Pending -> InFlight -> {Complete, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Turn accepted, evaluation not yet claimed.
    Pending,
    /// An evaluation task holds the claim and is running.
    InFlight,
    /// Terminal: evaluation produced a score.
    Complete,
    /// Terminal: evaluation gave up; score carries the unscored sentinel.
    Failed,
}

impl TurnStatus {
    /// Whether this status is terminal (complete or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnStatus::Complete | TurnStatus::Failed)
    }

    /// Whether `next` is a legal monotonic successor of `self`.
    pub fn can_transition_to(&self, next: TurnStatus) -> bool {
        match (self, next) {
            (TurnStatus::Pending, TurnStatus::InFlight) => true,
            (TurnStatus::Pending, TurnStatus::Complete | TurnStatus::Failed) => true,
            (TurnStatus::InFlight, TurnStatus::Complete | TurnStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStatus::Pending => write!(f, "pending"),
            TurnStatus::InFlight => write!(f, "in_flight"),
            TurnStatus::Complete => write!(f, "complete"),
            TurnStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Score and reasoning for one rubric sub-criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricCriterion {
    /// Name of the criterion (e.g., "clarity", "context").
    pub name: String,
    /// Score for this criterion, 0-100.
    pub score: f64,
    /// Short justification.
    pub reason: String,
}

/// Rubric output for one resolved intent label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricScore {
    /// The label this rubric was evaluated against.
    pub intent: Intent,
    /// Overall score for this label, 0-100.
    pub score: f64,
    /// Per-criterion breakdown.
    pub criteria: Vec<RubricCriterion>,
    /// Free-text reasoning from the scorer.
    pub reasoning: String,
}

/// One user-input/reply pair with its evaluation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Contiguous 1-based turn number within the session.
    pub number: u32,
    /// The user's input text.
    pub input: String,
    /// The generated reply.
    pub reply: String,
    /// Whether the guardrail blocked this turn.
    pub blocked: bool,
    /// Resolved intent, set by evaluation.
    pub intent: Option<Intent>,
    /// Evaluation status.
    pub status: TurnStatus,
    /// Turn score 0-100. `None` with status `Failed` is the unscored
    /// sentinel, distinct from a guardrail-forced zero.
    pub score: Option<f64>,
    /// Rubric breakdown, one entry per evaluated label.
    #[serde(default)]
    pub rubric: Vec<RubricScore>,
    /// Condensed reply rationale for holistic evaluation.
    #[serde(default)]
    pub rationale: String,
    /// When the turn was accepted.
    pub created_at: DateTime<Utc>,
    /// When evaluation reached a terminal state.
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl Turn {
    /// Creates a freshly accepted turn in `Pending` status.
    pub fn new(number: u32, input: impl Into<String>, reply: impl Into<String>, blocked: bool) -> Self {
        Self {
            number,
            input: input.into(),
            reply: reply.into(),
            blocked,
            intent: None,
            status: TurnStatus::Pending,
            score: None,
            rubric: Vec::new(),
            rationale: String::new(),
            created_at: Utc::now(),
            evaluated_at: None,
        }
    }

    /// Whether evaluation has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the turn terminated without a score (failure path), as
    /// opposed to a deliberate zero.
    pub fn is_unscored(&self) -> bool {
        self.status == TurnStatus::Failed && self.score.is_none()
    }

    /// Applies a terminal outcome. Content fields are untouched; callers
    /// are expected to have checked `can_transition_to` (the stores do).
    pub fn apply_outcome(&mut self, outcome: &TurnOutcome) {
        self.status = outcome.status;
        self.score = outcome.score;
        self.intent = outcome.intent;
        self.rubric = outcome.rubric.clone();
        self.rationale = outcome.rationale.clone();
        self.evaluated_at = Some(outcome.evaluated_at);
    }
}

/// Terminal result of one evaluation run, applied to a turn via the store's
/// compare-and-set write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Terminal status (`Complete` or `Failed`).
    pub status: TurnStatus,
    /// Final score, `None` for unscored.
    pub score: Option<f64>,
    /// Resolved intent if classification succeeded.
    pub intent: Option<Intent>,
    /// Rubric breakdown.
    pub rubric: Vec<RubricScore>,
    /// Reply rationale (may be empty).
    pub rationale: String,
    /// When the outcome was produced.
    pub evaluated_at: DateTime<Utc>,
}

impl TurnOutcome {
    /// A scored, complete outcome.
    pub fn complete(score: f64, intent: Intent, rubric: Vec<RubricScore>, rationale: String) -> Self {
        Self {
            status: TurnStatus::Complete,
            score: Some(score),
            intent: Some(intent),
            rubric,
            rationale,
            evaluated_at: Utc::now(),
        }
    }

    /// A guardrail-forced zero. Complete, not failed: the evaluation ran to
    /// a deliberate verdict.
    pub fn blocked_zero() -> Self {
        Self {
            status: TurnStatus::Complete,
            score: Some(0.0),
            intent: None,
            rubric: Vec::new(),
            rationale: String::new(),
            evaluated_at: Utc::now(),
        }
    }

    /// The unscored sentinel: terminal failure with no score.
    pub fn unscored() -> Self {
        Self {
            status: TurnStatus::Failed,
            score: None,
            intent: None,
            rubric: Vec::new(),
            rationale: String::new(),
            evaluated_at: Utc::now(),
        }
    }
}
