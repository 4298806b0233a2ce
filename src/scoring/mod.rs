//! Deterministic score aggregation.
//!
//! Every function here is pure: no clock, no store, no external calls.
//! Identical inputs always produce identical output, so the final score can
//! be recomputed and overwritten at any time.

use chrono::Utc;
use uuid::Uuid;

use crate::judge::{ExecutionReport, JudgeVerdict};
use crate::model::{FinalScore, Grade};

/// Weight of the prompt-quality dimension in the final score.
pub const WEIGHT_PROMPT: f64 = 0.25;
/// Weight of the execution-performance dimension.
pub const WEIGHT_PERFORMANCE: f64 = 0.25;
/// Weight of the execution-correctness dimension.
pub const WEIGHT_CORRECTNESS: f64 = 0.50;

/// Mean over all turns; unscored turns count as zero. An empty session
/// means zero.
pub fn turn_mean(scores: &[Option<f64>]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f64 = scores.iter().map(|s| s.unwrap_or(0.0)).sum();
    sum / scores.len() as f64
}

/// Prompt dimension: mean of the holistic overall score and the turn mean.
pub fn prompt_dimension(holistic_overall: f64, turn_mean: f64) -> f64 {
    (holistic_overall + turn_mean) / 2.0
}

/// Correctness from the execution report: fraction of accepted cases,
/// scaled to 0-100. No cases means zero.
pub fn correctness_score(report: &ExecutionReport) -> f64 {
    if report.results.is_empty() {
        return 0.0;
    }
    report.accepted() as f64 / report.results.len() as f64 * 100.0
}

/// Performance from the execution report: mean time headroom on accepted
/// cases. A case that used none of its CPU budget scores 100, one that used
/// all of it scores 0; non-accepted cases score 0.
pub fn performance_score(report: &ExecutionReport) -> f64 {
    if report.results.is_empty() || report.cpu_time_limit <= 0.0 {
        return 0.0;
    }
    let per_case: f64 = report
        .results
        .iter()
        .map(|r| {
            if r.verdict != JudgeVerdict::Accepted {
                return 0.0;
            }
            let used = (r.time_secs / report.cpu_time_limit).clamp(0.0, 1.0);
            (1.0 - used) * 100.0
        })
        .sum();
    per_case / report.results.len() as f64
}

/// Assembles the immutable final score from the three dimensions.
pub fn final_score(
    session_id: Uuid,
    prompt: f64,
    performance: f64,
    correctness: f64,
    all_turns_scored: bool,
) -> FinalScore {
    let total = prompt * WEIGHT_PROMPT + performance * WEIGHT_PERFORMANCE
        + correctness * WEIGHT_CORRECTNESS;
    FinalScore {
        session_id,
        prompt_score: round2(prompt),
        performance_score: round2(performance),
        correctness_score: round2(correctness),
        total: round2(total),
        grade: Grade::from_total(total),
        all_turns_scored,
        created_at: Utc::now(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
