//! Finalize synchronization guard.
//!
//! Bridges detached background evaluation and the synchronous finalize
//! call. The guard never blocks indefinitely: it polls turn statuses up to
//! `wait_ceiling`, then re-runs whatever is still open inline under
//! `recompute_ceiling`, and finally marks anything left as unscored. Total
//! wall clock is bounded by `wait_ceiling + recompute_ceiling` regardless
//! of how many turns are outstanding or how the inference service behaves.
//!
//! Completeness problems surface only through the `all_turns_scored` flag,
//! never as an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Turn, TurnOutcome, TurnStatus};
use crate::pipeline::TurnEvaluator;
use crate::store::SessionStore;

/// Timing budget for the guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Interval between status polls during the wait phase.
    pub poll_interval: Duration,
    /// Total budget for the wait phase.
    pub wait_ceiling: Duration,
    /// Total budget for the inline recovery phase.
    pub recompute_ceiling: Duration,
    /// Retry attempts per recovered turn; rate limits consume these.
    pub recovery_retries: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            wait_ceiling: Duration::from_secs(30),
            recompute_ceiling: Duration::from_secs(20),
            recovery_retries: 2,
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the wait-phase ceiling.
    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }

    /// Sets the recovery-phase ceiling.
    pub fn with_recompute_ceiling(mut self, ceiling: Duration) -> Self {
        self.recompute_ceiling = ceiling;
        self
    }

    /// Sets the per-turn recovery retry budget.
    pub fn with_recovery_retries(mut self, retries: u32) -> Self {
        self.recovery_retries = retries;
        self
    }
}

/// One turn's entry in the completeness report.
#[derive(Debug, Clone)]
pub struct TurnReportEntry {
    pub number: u32,
    pub status: TurnStatus,
    pub score: Option<f64>,
    pub blocked: bool,
}

/// What finalize learned about the session's turns.
#[derive(Debug, Clone)]
pub struct CompletenessReport {
    /// Per-turn entries, ordered by turn number.
    pub turns: Vec<TurnReportEntry>,
    /// True only when every turn completed with a score.
    pub all_turns_scored: bool,
}

impl CompletenessReport {
    /// Scores ordered by turn number; `None` marks unscored turns.
    pub fn scores(&self) -> Vec<Option<f64>> {
        self.turns.iter().map(|t| t.score).collect()
    }

    fn from_turns(turns: &[Turn]) -> Self {
        let entries: Vec<TurnReportEntry> = turns
            .iter()
            .map(|t| TurnReportEntry {
                number: t.number,
                status: t.status,
                score: t.score,
                blocked: t.blocked,
            })
            .collect();
        let all_scored = entries
            .iter()
            .all(|t| t.status == TurnStatus::Complete && t.score.is_some());
        Self {
            turns: entries,
            all_turns_scored: all_scored,
        }
    }
}

/// The synchronization guard.
pub struct FinalizeGuard {
    store: Arc<dyn SessionStore>,
    evaluator: Arc<TurnEvaluator>,
    config: GuardConfig,
}

impl FinalizeGuard {
    pub fn new(
        store: Arc<dyn SessionStore>,
        evaluator: Arc<TurnEvaluator>,
        config: GuardConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            config,
        }
    }

    /// Waits for every turn of the session to reach a terminal state,
    /// recovering stragglers inline, and returns the completeness report.
    ///
    /// Errors only on store failure; unscored turns are reported, not
    /// raised.
    pub async fn await_completion(&self, session: Uuid) -> Result<CompletenessReport, StoreError> {
        let started = Instant::now();

        // Phase 1: poll until terminal or ceiling.
        let mut turns = self.store.list_turns(session).await?;
        let wait_deadline = started + self.config.wait_ceiling;
        while !turns.iter().all(Turn::is_terminal) {
            let now = Instant::now();
            if now >= wait_deadline {
                break;
            }
            let nap = self.config.poll_interval.min(wait_deadline - now);
            tokio::time::sleep(nap).await;
            turns = self.store.list_turns(session).await?;
        }

        let open: Vec<u32> = turns
            .iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.number)
            .collect();

        if !open.is_empty() {
            info!(
                %session,
                outstanding = open.len(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Wait ceiling reached, recovering turns inline"
            );

            // Phase 2: concurrent inline recovery, each run bounded by the
            // recompute ceiling. Abandoned background tasks keep running;
            // the store's terminal CAS picks a single winner per turn.
            let recoveries = open.iter().map(|&number| {
                self.evaluator.evaluate_inline(
                    session,
                    number,
                    self.config.recompute_ceiling,
                    self.config.recovery_retries,
                )
            });
            for (number, result) in open.iter().zip(join_all(recoveries).await) {
                if let Err(e) = result {
                    warn!(%session, turn = number, error = %e, "Inline recovery hit a store error");
                }
            }

            // Phase 3: anything still open gets the unscored sentinel so
            // finalize can proceed.
            turns = self.store.list_turns(session).await?;
            for turn in turns.iter().filter(|t| !t.is_terminal()) {
                debug!(%session, turn = turn.number, "Marking unrecovered turn unscored");
                let _ = self
                    .store
                    .finish_turn(session, turn.number, &TurnOutcome::unscored())
                    .await?;
            }
            turns = self.store.list_turns(session).await?;
        }

        let report = CompletenessReport::from_turns(&turns);
        info!(
            %session,
            turns = report.turns.len(),
            all_turns_scored = report.all_turns_scored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completeness report assembled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{ChatRequest, ChatResponse, InferenceClient, Usage};
    use crate::model::{ConversationSession, Intent};
    use crate::pipeline::EvaluatorConfig;
    use crate::store::{MemoryStore, SessionStore};
    use async_trait::async_trait;

    /// Client whose every call stalls far past any test ceiling.
    struct StallingClient;

    #[async_trait]
    impl InferenceClient for StallingClient {
        async fn complete(&self, _r: ChatRequest) -> Result<ChatResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            unreachable!()
        }
    }

    /// Client that always produces a scoreable pipeline run.
    struct HealthyClient;

    #[async_trait]
    impl InferenceClient for HealthyClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            let content = if request.messages[0].content.contains("classify") {
                r#"{"intents": ["HINT_OR_QUERY"]}"#.to_string()
            } else if request.messages[0].content.contains("grade") {
                r#"{"score": 50.0, "criteria": [], "reasoning": "ok"}"#.to_string()
            } else {
                "a short rationale".to_string()
            };
            Ok(ChatResponse {
                id: "r".into(),
                model: "m".into(),
                content,
                usage: Usage::default(),
            })
        }
    }

    fn tight_config() -> GuardConfig {
        GuardConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_ceiling(Duration::from_millis(100))
            .with_recompute_ceiling(Duration::from_millis(100))
            .with_recovery_retries(1)
    }

    async fn session_with_turns(store: &MemoryStore, n: u32) -> Uuid {
        let session = ConversationSession::new(None);
        let id = session.id;
        store.create_session(&session).await.unwrap();
        for _ in 0..n {
            let number = store.next_turn_number(id).await.unwrap();
            store
                .put_turn(id, &Turn::new(number, "input", "reply", false))
                .await
                .unwrap();
        }
        id
    }

    fn guard(store: Arc<MemoryStore>, llm: Arc<dyn InferenceClient>, config: GuardConfig) -> FinalizeGuard {
        let evaluator = Arc::new(TurnEvaluator::new(
            llm,
            store.clone(),
            EvaluatorConfig::default(),
        ));
        FinalizeGuard::new(store, evaluator, config)
    }

    #[tokio::test]
    async fn test_already_terminal_returns_immediately() {
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 2).await;
        for n in 1..=2 {
            store
                .finish_turn(
                    session,
                    n,
                    &TurnOutcome::complete(80.0, Intent::Generation, vec![], String::new()),
                )
                .await
                .unwrap();
        }

        let guard = guard(store, Arc::new(StallingClient), tight_config());
        let started = Instant::now();
        let report = guard.await_completion(session).await.unwrap();

        assert!(report.all_turns_scored);
        assert_eq!(report.scores(), vec![Some(80.0), Some(80.0)]);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_bounded_latency_with_stuck_turns() {
        // K turns whose evaluation never completes: finalize must still
        // return by wait_ceiling + recompute_ceiling with them unscored.
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 3).await;

        let config = tight_config();
        let bound = config.wait_ceiling + config.recompute_ceiling;
        let guard = guard(store, Arc::new(StallingClient), config);

        let started = Instant::now();
        let report = guard.await_completion(session).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!report.all_turns_scored);
        assert_eq!(report.turns.len(), 3);
        assert!(report.turns.iter().all(|t| t.status == TurnStatus::Failed));
        assert!(report.scores().iter().all(Option::is_none));
        // Generous slack over the configured bound for scheduler noise.
        assert!(
            elapsed < bound + Duration::from_millis(500),
            "guard took {:?}, bound was {:?}",
            elapsed,
            bound
        );
    }

    #[tokio::test]
    async fn test_inline_recovery_scores_open_turn() {
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 1).await;

        let config = GuardConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_ceiling(Duration::from_millis(30))
            .with_recompute_ceiling(Duration::from_secs(5));
        let guard = guard(store.clone(), Arc::new(HealthyClient), config);

        let report = guard.await_completion(session).await.unwrap();
        assert!(report.all_turns_scored);
        assert_eq!(report.scores(), vec![Some(50.0)]);

        let turn = store.fetch_turn(session, 1).await.unwrap().unwrap();
        assert_eq!(turn.status, TurnStatus::Complete);
    }

    #[tokio::test]
    async fn test_wait_phase_observes_background_completion() {
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 1).await;

        // A "background task" that completes the turn mid-wait.
        let writer_store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer_store
                .finish_turn(
                    session,
                    1,
                    &TurnOutcome::complete(64.0, Intent::Debugging, vec![], String::new()),
                )
                .await
                .unwrap();
        });

        let config = GuardConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_ceiling(Duration::from_secs(5))
            .with_recompute_ceiling(Duration::from_secs(5));
        let guard = guard(store, Arc::new(StallingClient), config);

        let report = guard.await_completion(session).await.unwrap();
        assert!(report.all_turns_scored);
        assert_eq!(report.scores(), vec![Some(64.0)]);
    }

    #[tokio::test]
    async fn test_empty_session_reports_complete() {
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 0).await;
        let guard = guard(store, Arc::new(StallingClient), tight_config());

        let report = guard.await_completion(session).await.unwrap();
        assert!(report.all_turns_scored);
        assert!(report.turns.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_terminal_states_reported() {
        let store = Arc::new(MemoryStore::default());
        let session = session_with_turns(&store, 3).await;
        store
            .finish_turn(
                session,
                1,
                &TurnOutcome::complete(90.0, Intent::Generation, vec![], String::new()),
            )
            .await
            .unwrap();
        store
            .finish_turn(session, 2, &TurnOutcome::blocked_zero())
            .await
            .unwrap();
        store
            .finish_turn(session, 3, &TurnOutcome::unscored())
            .await
            .unwrap();

        let guard = guard(store, Arc::new(StallingClient), tight_config());
        let report = guard.await_completion(session).await.unwrap();

        // An unscored turn means not all scored; the blocked zero counts
        // as scored.
        assert!(!report.all_turns_scored);
        assert_eq!(report.scores(), vec![Some(90.0), Some(0.0), None]);
    }
}
