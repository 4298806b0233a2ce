//! Whole-session holistic evaluation.
//!
//! After the guard reports completeness (full or partial), one structured
//! inference call scores the session across turns: how the problem was
//! decomposed, how feedback was integrated, initiative, strategic
//! exploration, and a technique bonus. Runs exactly once per session, from
//! the finalize path.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{parse_structured, ChatRequest, InferenceClient, Message, RetryPolicy};
use crate::model::{HolisticResult, Turn};

const HOLISTIC_PROMPT: &str = r#"You evaluate a complete multi-turn coding conversation.

You receive every turn: the resolved intent, the user prompt, a rationale of
the assistant reply, and the per-turn score. Judge the session as a whole,
each dimension 0-100:

- decomposition: did the user break the problem into tractable steps?
- feedback_integration: were earlier replies absorbed and built upon?
- initiative: did the user drive the session, catching errors themselves?
- strategic_exploration: were alternative approaches weighed?
- technique_bonus: notable prompting technique (examples, constraints, personas)
- overall: your overall judgement of the session, 0-100

Respond with JSON:
{"decomposition": n, "feedback_integration": n, "initiative": n,
 "strategic_exploration": n, "technique_bonus": n, "overall": n,
 "analysis": "free-text analysis"}"#;

fn holistic_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "decomposition": {"type": "number"},
            "feedback_integration": {"type": "number"},
            "initiative": {"type": "number"},
            "strategic_exploration": {"type": "number"},
            "technique_bonus": {"type": "number"},
            "overall": {"type": "number"},
            "analysis": {"type": "string"}
        },
        "required": ["decomposition", "feedback_integration", "initiative",
                     "strategic_exploration", "technique_bonus", "overall"]
    })
}

#[derive(Debug, Deserialize)]
struct HolisticWire {
    decomposition: f64,
    feedback_integration: f64,
    initiative: f64,
    strategic_exploration: f64,
    technique_bonus: f64,
    overall: f64,
    #[serde(default)]
    analysis: String,
}

/// Renders the ordered turn summaries the evaluator reads.
fn render_turns(turns: &[Turn]) -> String {
    let mut rendered = String::new();
    for turn in turns {
        let intent = turn
            .intent
            .map(|i| i.as_str().to_string())
            .unwrap_or_else(|| "UNRESOLVED".to_string());
        let score = turn
            .score
            .map(|s| format!("{:.0}", s))
            .unwrap_or_else(|| "unscored".to_string());
        rendered.push_str(&format!(
            "Turn {} [{} | score {}]\nUser: {}\nReply rationale: {}\n\n",
            turn.number,
            intent,
            score,
            turn.input,
            if turn.rationale.is_empty() {
                "(none)"
            } else {
                &turn.rationale
            },
        ));
    }
    rendered
}

/// The holistic evaluator.
pub struct HolisticEvaluator {
    llm: Arc<dyn InferenceClient>,
    model: String,
    retry: RetryPolicy,
}

impl HolisticEvaluator {
    pub fn new(llm: Arc<dyn InferenceClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Scores the whole session from its ordered turns.
    ///
    /// Transient failures are retried under the policy; a structural
    /// failure gets one identical retry. Callers fall back to
    /// [`HolisticResult::fallback`] when this errs.
    pub async fn evaluate(
        &self,
        problem: Option<&str>,
        turns: &[Turn],
    ) -> Result<HolisticResult, LlmError> {
        let mut user = String::new();
        if let Some(problem) = problem {
            user.push_str("Problem worked on:\n");
            user.push_str(problem);
            user.push_str("\n\n");
        }
        user.push_str(&render_turns(turns));

        let request = ChatRequest::new(
            self.model.clone(),
            vec![Message::system(HOLISTIC_PROMPT), Message::user(user)],
        )
        .with_temperature(0.2)
        .with_max_tokens(1500)
        .with_schema(holistic_schema());

        let attempt = |req: ChatRequest| async {
            let response = self.llm.complete(req).await?;
            parse_structured::<HolisticWire>(&response)
        };

        let wire = match self
            .retry
            .run(|| attempt(request.clone()), LlmError::is_transient)
            .await
        {
            Ok(wire) => wire,
            Err(LlmError::SchemaMismatch(first)) => {
                debug!(error = %first, "Holistic schema mismatch, retrying once");
                attempt(request).await?
            }
            Err(e) => return Err(e),
        };

        Ok(HolisticResult {
            decomposition: wire.decomposition.clamp(0.0, 100.0),
            feedback_integration: wire.feedback_integration.clamp(0.0, 100.0),
            initiative: wire.initiative.clamp(0.0, 100.0),
            strategic_exploration: wire.strategic_exploration.clamp(0.0, 100.0),
            technique_bonus: wire.technique_bonus.clamp(0.0, 100.0),
            overall: wire.overall.clamp(0.0, 100.0),
            analysis: wire.analysis,
        })
    }
}
