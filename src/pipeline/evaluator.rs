//! Turn evaluation pipeline.
//!
//! One instance serves both execution paths:
//!
//! - **Background**: `evaluate` is spawned detached right after a reply is
//!   generated. It takes the store claim, runs the pipeline and lands the
//!   terminal result through the compare-and-set write.
//! - **Inline**: `evaluate_inline` is the finalize guard's recovery path:
//!   same pipeline under an explicit deadline and a small retry budget that
//!   rate-limit errors consume.
//!
//! Pipeline stages: classify intent -> concurrent rubric fan-out ->
//! aggregate -> summarize -> persist. A guardrail-blocked turn short-circuits
//! straight to the forced zero without spending inference calls.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EvalError, EvalResult, LlmError, StoreError};
use crate::llm::{parse_structured, ChatRequest, InferenceClient, Message, RetryPolicy};
use crate::metrics;
use crate::model::{
    intent, Intent, RubricCriterion, RubricScore, Turn, TurnOutcome, TurnStatus,
};
use crate::store::SessionStore;

const CLASSIFY_PROMPT: &str = r#"You classify the intent of one exchange in a coding conversation.

Pick every label that applies from this closed vocabulary:
GENERATION, OPTIMIZATION, DEBUGGING, TEST_CASE, RULE_SETTING, SYSTEM_PROMPT, HINT_OR_QUERY, FOLLOW_UP

Return at least one label. Respond with JSON:
{"intents": ["LABEL", ...], "confidence": 0.0-1.0}"#;

const RUBRIC_PROMPT: &str = r#"You grade the quality of a user's prompt in a coding conversation.

The prompt was classified as {intent}. Focus: {focus}

Score each criterion 0-100:
- clarity: is the request unambiguous?
- relevance: does it engage the problem being solved?
- examples: are concrete examples or cases given where useful?
- rules: are constraints and requirements stated?
- context: does it build on the conversation so far?

Respond with JSON:
{"score": 0-100, "criteria": [{"name": "...", "score": 0-100, "reason": "..."}], "reasoning": "..."}"#;

const SUMMARY_PROMPT: &str = "Condense the assistant reply below into at most three \
lines: what it provided, the approach taken, the key point made.";

/// Evaluation focus text per intent, substituted into the rubric prompt.
fn rubric_focus(intent: Intent) -> &'static str {
    match intent {
        Intent::Generation => "how precisely the desired code and its requirements are specified",
        Intent::Optimization => "how clearly the performance goal and the current bottleneck are described",
        Intent::Debugging => "how well the failure is reported: symptom, expected behavior, reproduction",
        Intent::TestCase => "how well the cases to cover, including edges, are identified",
        Intent::RuleSetting => "how complete and consistent the stated constraints are",
        Intent::SystemPrompt => "how actionable the role and style definition is",
        Intent::HintOrQuery => "how well-scoped the question is and what understanding it shows",
        Intent::FollowUp => "how specifically it engages with the previous reply",
    }
}

fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "intents": {
                "type": "array",
                "minItems": 1,
                "items": {"type": "string", "enum": [
                    "GENERATION", "OPTIMIZATION", "DEBUGGING", "TEST_CASE",
                    "RULE_SETTING", "SYSTEM_PROMPT", "HINT_OR_QUERY", "FOLLOW_UP"
                ]}
            },
            "confidence": {"type": "number"}
        },
        "required": ["intents"]
    })
}

fn rubric_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": {"type": "number", "minimum": 0, "maximum": 100},
            "criteria": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "score": {"type": "number"},
                        "reason": {"type": "string"}
                    },
                    "required": ["name", "score"]
                }
            },
            "reasoning": {"type": "string"}
        },
        "required": ["score"]
    })
}

#[derive(Debug, Deserialize)]
struct IntentClassification {
    intents: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RubricEvaluation {
    score: f64,
    #[serde(default)]
    criteria: Vec<RubricCriterionWire>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RubricCriterionWire {
    name: String,
    score: f64,
    #[serde(default)]
    reason: String,
}

/// Configuration for the turn evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Model for classification, rubric and summary calls; empty uses the
    /// client default.
    pub model: String,
    /// Sampling temperature for scoring calls.
    pub temperature: f64,
    /// Max tokens per scoring call.
    pub max_tokens: u32,
    /// Retry policy for the background path.
    pub retry: RetryPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.2,
            max_tokens: 1200,
            retry: RetryPolicy::default(),
        }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the background retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The turn evaluation pipeline.
pub struct TurnEvaluator {
    llm: Arc<dyn InferenceClient>,
    store: Arc<dyn SessionStore>,
    config: EvaluatorConfig,
}

impl TurnEvaluator {
    pub fn new(
        llm: Arc<dyn InferenceClient>,
        store: Arc<dyn SessionStore>,
        config: EvaluatorConfig,
    ) -> Self {
        Self { llm, store, config }
    }

    /// Background entry point: claim, evaluate, persist.
    ///
    /// Infallible by design — every failure path lands a terminal record or
    /// logs and leaves the turn for the guard to recover. Nothing here can
    /// reach the orchestrator's reply path.
    pub async fn evaluate(&self, session: Uuid, number: u32) {
        match self.store.claim_turn(session, number).await {
            Ok(true) => {}
            Ok(false) => {
                metrics::record_claim_lost("background");
                debug!(%session, turn = number, "Claim already held, aborting dispatch");
                return;
            }
            Err(e) => {
                warn!(%session, turn = number, error = %e, "Claim attempt failed");
                return;
            }
        }

        let turn = match self.store.fetch_turn(session, number).await {
            Ok(Some(turn)) => turn,
            Ok(None) => {
                warn!(%session, turn = number, "Claimed turn vanished from store");
                return;
            }
            Err(e) => {
                warn!(%session, turn = number, error = %e, "Failed to fetch claimed turn");
                return;
            }
        };

        let result = self.run_pipeline(&turn, &self.config.retry).await;
        if let Err(e) = self.land(session, number, result, "background").await {
            warn!(%session, turn = number, error = %e, "Failed to persist evaluation");
        }
    }

    /// Inline recovery entry point used by the finalize guard.
    ///
    /// Runs the pipeline under `deadline` with a retry budget of
    /// `max_retries` attempts; rate-limit errors consume that budget rather
    /// than retrying forever. On any exhaustion the turn is landed as
    /// unscored. Returns the turn's resulting terminal record, whichever
    /// writer produced it.
    pub async fn evaluate_inline(
        &self,
        session: Uuid,
        number: u32,
        deadline: Duration,
        max_retries: u32,
    ) -> Result<Turn, StoreError> {
        let turn = self
            .store
            .fetch_turn(session, number)
            .await?
            .ok_or(StoreError::TurnNotFound { session, turn: number })?;
        if turn.is_terminal() {
            return Ok(turn);
        }

        // Take the claim when it is still free. A held claim belongs to an
        // abandoned background task; the terminal CAS arbitrates that race.
        if turn.status == TurnStatus::Pending
            && !self.store.claim_turn(session, number).await?
        {
            metrics::record_claim_lost("inline");
        }

        let retry = RetryPolicy::new(max_retries.max(1))
            .with_base_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2));

        let result = match tokio::time::timeout(deadline, self.run_pipeline(&turn, &retry)).await {
            Ok(result) => result,
            Err(_) => Err(EvalError::DeadlineExceeded {
                seconds: deadline.as_secs(),
            }),
        };

        let scored = matches!(result, Ok(_));
        self.land(session, number, result, "inline").await?;
        metrics::record_guard_recovery(if scored { "scored" } else { "unscored" });

        self.store
            .fetch_turn(session, number)
            .await?
            .ok_or(StoreError::TurnNotFound { session, turn: number })
    }

    /// Lands a pipeline result as a terminal record. A pipeline error maps
    /// onto the unscored sentinel. Returns whether this writer's record won
    /// the compare-and-set.
    async fn land(
        &self,
        session: Uuid,
        number: u32,
        result: EvalResult<TurnOutcome>,
        path: &str,
    ) -> Result<bool, StoreError> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                info!(%session, turn = number, path, error = %e, "Evaluation failed, landing unscored");
                TurnOutcome::unscored()
            }
        };

        let landed = self.store.finish_turn(session, number, &outcome).await?;
        if landed {
            let label = if outcome.status == TurnStatus::Failed {
                "failed"
            } else if outcome.score == Some(0.0) && outcome.intent.is_none() {
                "blocked"
            } else {
                "complete"
            };
            metrics::record_evaluation(label);
            info!(
                %session,
                turn = number,
                path,
                status = %outcome.status,
                score = ?outcome.score,
                "Turn evaluation persisted"
            );
        } else {
            debug!(%session, turn = number, path, "Terminal record already present, write was a no-op");
        }
        Ok(landed)
    }

    /// The evaluation pipeline proper. Pure with respect to the store: all
    /// persistence happens in `land`.
    async fn run_pipeline(&self, turn: &Turn, retry: &RetryPolicy) -> EvalResult<TurnOutcome> {
        if turn.blocked {
            // Forced zero; rubric fan-out deliberately skipped.
            return Ok(TurnOutcome::blocked_zero());
        }

        let labels = self.classify(turn, retry).await?;
        let resolved = intent::resolve(&labels).ok_or_else(|| {
            EvalError::Llm(LlmError::SchemaMismatch("empty intent set".to_string()))
        })?;
        debug!(turn = turn.number, intent = %resolved, "Intent resolved");

        // The fan-out handles any number of labels; the priority table
        // currently reduces to one.
        let rubric = self.score_rubrics(turn, std::slice::from_ref(&resolved), retry).await?;
        let score = mean_score(&rubric);

        let rationale = self.summarize(turn).await;

        Ok(TurnOutcome::complete(score, resolved, rubric, rationale))
    }

    /// Stage 1: intent classification against the closed vocabulary.
    async fn classify(&self, turn: &Turn, retry: &RetryPolicy) -> EvalResult<Vec<Intent>> {
        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(CLASSIFY_PROMPT),
                Message::user(format!("User: {}\n\nAssistant: {}", turn.input, turn.reply)),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(200)
        .with_schema(classification_schema());

        let classification: IntentClassification = self.structured_call(request, retry).await?;
        let labels: Vec<Intent> = classification
            .intents
            .iter()
            .filter_map(|label| Intent::from_label(label))
            .collect();
        if labels.is_empty() {
            return Err(EvalError::Llm(LlmError::SchemaMismatch(format!(
                "no known label in {:?}",
                classification.intents
            ))));
        }
        Ok(labels)
    }

    /// Stage 2: one rubric call per label, dispatched concurrently.
    async fn score_rubrics(
        &self,
        turn: &Turn,
        labels: &[Intent],
        retry: &RetryPolicy,
    ) -> EvalResult<Vec<RubricScore>> {
        let calls = labels.iter().map(|&label| {
            let prompt = RUBRIC_PROMPT
                .replace("{intent}", label.as_str())
                .replace("{focus}", rubric_focus(label));
            let request = ChatRequest::new(
                self.config.model.clone(),
                vec![
                    Message::system(prompt),
                    Message::user(format!(
                        "User prompt:\n{}\n\nAssistant reply:\n{}",
                        turn.input, turn.reply
                    )),
                ],
            )
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_schema(rubric_schema());

            async move {
                let evaluation: RubricEvaluation = self.structured_call(request, retry).await?;
                Ok::<RubricScore, EvalError>(RubricScore {
                    intent: label,
                    score: evaluation.score.clamp(0.0, 100.0),
                    criteria: evaluation
                        .criteria
                        .into_iter()
                        .map(|c| RubricCriterion {
                            name: c.name,
                            score: c.score.clamp(0.0, 100.0),
                            reason: c.reason,
                        })
                        .collect(),
                    reasoning: evaluation.reasoning,
                })
            }
        });

        join_all(calls).await.into_iter().collect()
    }

    /// Stage 4: condense the reply into a rationale. Non-fatal: any failure
    /// substitutes an empty rationale and leaves the turn score untouched.
    async fn summarize(&self, turn: &Turn) -> String {
        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(SUMMARY_PROMPT),
                Message::user(turn.reply.clone()),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(200);

        match self.llm.complete(request).await {
            Ok(response) => response.content.trim().to_string(),
            Err(e) => {
                warn!(turn = turn.number, error = %e, "Summary failed, substituting empty rationale");
                String::new()
            }
        }
    }

    /// One structured call: transient failures retried under `retry`, then
    /// a single identical retry for a structural failure before giving up.
    async fn structured_call<T: DeserializeOwned>(
        &self,
        request: ChatRequest,
        retry: &RetryPolicy,
    ) -> Result<T, LlmError> {
        let attempt = |req: ChatRequest| async {
            let response = self.llm.complete(req).await?;
            parse_structured::<T>(&response)
        };

        match retry
            .run(|| attempt(request.clone()), LlmError::is_transient)
            .await
        {
            Ok(value) => Ok(value),
            Err(LlmError::SchemaMismatch(first)) => {
                debug!(error = %first, "Schema mismatch, retrying once");
                attempt(request).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Stage 3: arithmetic mean of per-label scores.
fn mean_score(rubric: &[RubricScore]) -> f64 {
    if rubric.is_empty() {
        return 0.0;
    }
    let sum: f64 = rubric.iter().map(|r| r.score).sum();
    (sum / rubric.len() as f64).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, Usage};
    use crate::model::ConversationSession;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted client: pops one canned result per call.
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("{}".to_string()));
            next.map(|content| ChatResponse {
                id: "r".into(),
                model: "m".into(),
                content,
                usage: Usage::default(),
            })
        }
    }

    async fn seeded_store(blocked: bool) -> (Arc<MemoryStore>, Uuid, u32) {
        let store = Arc::new(MemoryStore::default());
        let session = ConversationSession::new(None);
        let id = session.id;
        store.create_session(&session).await.unwrap();
        let number = store.next_turn_number(id).await.unwrap();
        store
            .put_turn(id, &Turn::new(number, "write a sorter", "start with merge sort", blocked))
            .await
            .unwrap();
        (store, id, number)
    }

    fn classify_response() -> String {
        r#"{"intents": ["GENERATION"], "confidence": 0.9}"#.to_string()
    }

    fn rubric_response(score: f64) -> String {
        format!(
            r#"{{"score": {}, "criteria": [{{"name": "clarity", "score": {}, "reason": "clear"}}], "reasoning": "solid prompt"}}"#,
            score, score
        )
    }

    #[tokio::test]
    async fn test_background_evaluation_completes_turn() {
        let (store, session, number) = seeded_store(false).await;
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(classify_response()),
            Ok(rubric_response(84.0)),
            Ok("provided a merge sort outline".to_string()),
        ]));
        let evaluator = TurnEvaluator::new(
            client.clone(),
            store.clone(),
            EvaluatorConfig::default().with_retry(RetryPolicy::none()),
        );

        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Complete);
        assert_eq!(turn.score, Some(84.0));
        assert_eq!(turn.intent, Some(Intent::Generation));
        assert_eq!(turn.rationale, "provided a merge sort outline");
        assert_eq!(turn.rubric.len(), 1);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_blocked_turn_short_circuits_without_inference() {
        let (store, session, number) = seeded_store(true).await;
        let client = Arc::new(ScriptedClient::new(vec![]));
        let evaluator =
            TurnEvaluator::new(client.clone(), store.clone(), EvaluatorConfig::default());

        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Complete);
        assert_eq!(turn.score, Some(0.0));
        assert!(!turn.is_unscored());
        assert_eq!(client.call_count(), 0, "blocked turns spend no inference");
    }

    #[tokio::test]
    async fn test_classification_failure_lands_unscored() {
        let (store, session, number) = seeded_store(false).await;
        // Both the first attempt and the single structural retry misparse.
        let client = Arc::new(ScriptedClient::new(vec![
            Ok("not json".to_string()),
            Ok("still not json".to_string()),
        ]));
        let evaluator = TurnEvaluator::new(
            client,
            store.clone(),
            EvaluatorConfig::default().with_retry(RetryPolicy::none()),
        );

        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Failed);
        assert!(turn.is_unscored());
    }

    #[tokio::test]
    async fn test_schema_mismatch_retries_once_and_recovers() {
        let (store, session, number) = seeded_store(false).await;
        let client = Arc::new(ScriptedClient::new(vec![
            Ok("garbled".to_string()),
            Ok(classify_response()),
            Ok(rubric_response(70.0)),
            Ok("summary".to_string()),
        ]));
        let evaluator = TurnEvaluator::new(
            client.clone(),
            store.clone(),
            EvaluatorConfig::default().with_retry(RetryPolicy::none()),
        );

        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Complete);
        assert_eq!(turn.score, Some(70.0));
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test]
    async fn test_summary_failure_is_non_fatal() {
        let (store, session, number) = seeded_store(false).await;
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(classify_response()),
            Ok(rubric_response(66.0)),
            Err(LlmError::RateLimited("busy".into())),
        ]));
        let evaluator = TurnEvaluator::new(
            client,
            store.clone(),
            EvaluatorConfig::default().with_retry(RetryPolicy::none()),
        );

        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Complete);
        assert_eq!(turn.score, Some(66.0));
        assert_eq!(turn.rationale, "");
    }

    #[tokio::test]
    async fn test_lost_claim_spends_no_inference() {
        let (store, session, number) = seeded_store(false).await;
        store.claim_turn(session, number).await.unwrap();

        let client = Arc::new(ScriptedClient::new(vec![]));
        let evaluator =
            TurnEvaluator::new(client.clone(), store.clone(), EvaluatorConfig::default());

        evaluator.evaluate(session, number).await;

        assert_eq!(client.call_count(), 0);
        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::InFlight);
    }

    #[tokio::test]
    async fn test_inline_deadline_lands_unscored() {
        let (store, session, number) = seeded_store(false).await;

        /// Client that never answers within the deadline.
        struct StallingClient;
        #[async_trait]
        impl InferenceClient for StallingClient {
            async fn complete(&self, _r: ChatRequest) -> Result<ChatResponse, LlmError> {
                tokio::time::sleep(Duration::from_secs(300)).await;
                unreachable!()
            }
        }

        let evaluator = TurnEvaluator::new(
            Arc::new(StallingClient),
            store.clone(),
            EvaluatorConfig::default(),
        );

        let turn = evaluator
            .evaluate_inline(session, number, Duration::from_millis(50), 1)
            .await
            .unwrap();
        assert_eq!(turn.status, TurnStatus::Failed);
        assert!(turn.is_unscored());
    }

    #[tokio::test]
    async fn test_inline_rate_limits_consume_retry_budget() {
        let (store, session, number) = seeded_store(false).await;
        let client = Arc::new(ScriptedClient::new(vec![
            Err(LlmError::RateLimited("1".into())),
            Err(LlmError::RateLimited("2".into())),
            Err(LlmError::RateLimited("3".into())),
        ]));
        let evaluator =
            TurnEvaluator::new(client.clone(), store.clone(), EvaluatorConfig::default());

        let turn = evaluator
            .evaluate_inline(session, number, Duration::from_secs(30), 2)
            .await
            .unwrap();

        assert!(turn.is_unscored());
        assert_eq!(client.call_count(), 2, "budget of 2 attempts, not forever");
    }

    #[tokio::test]
    async fn test_inline_returns_existing_terminal_turn() {
        let (store, session, number) = seeded_store(false).await;
        store
            .finish_turn(
                session,
                number,
                &TurnOutcome::complete(91.0, Intent::Generation, vec![], "done".into()),
            )
            .await
            .unwrap();

        let client = Arc::new(ScriptedClient::new(vec![]));
        let evaluator =
            TurnEvaluator::new(client.clone(), store.clone(), EvaluatorConfig::default());

        let turn = evaluator
            .evaluate_inline(session, number, Duration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(turn.score, Some(91.0));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_on_complete_turn_is_noop_via_claim() {
        // Idempotence: dispatching again after completion neither rescores
        // nor touches content.
        let (store, session, number) = seeded_store(false).await;
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(classify_response()),
            Ok(rubric_response(88.0)),
            Ok("first".to_string()),
        ]));
        let evaluator = TurnEvaluator::new(
            client.clone(),
            store.clone(),
            EvaluatorConfig::default().with_retry(RetryPolicy::none()),
        );

        evaluator.evaluate(session, number).await;
        evaluator.evaluate(session, number).await;

        let turn = store.fetch_turn(session, number).await.unwrap().unwrap();
        assert_eq!(turn.score, Some(88.0));
        assert_eq!(turn.input, "write a sorter");
        assert_eq!(client.call_count(), 3, "second dispatch lost the claim");
    }

    #[test]
    fn test_mean_score() {
        let rubric = |s: f64| RubricScore {
            intent: Intent::Generation,
            score: s,
            criteria: vec![],
            reasoning: String::new(),
        };
        assert_eq!(mean_score(&[]), 0.0);
        assert_eq!(mean_score(&[rubric(80.0)]), 80.0);
        assert_eq!(mean_score(&[rubric(80.0), rubric(60.0)]), 70.0);
    }
}
