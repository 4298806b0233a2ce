//! Conversation orchestrator: the foreground state machine.
//!
//! `accept_input` runs the guardrail, writes the reply, atomically numbers
//! the turn and dispatches its evaluation detached — the reply returns
//! before any scoring happens. `request_finalize` drives the guard,
//! holistic evaluator, judge and aggregator to a durable `FinalScore`.
//!
//! Failure discipline: nothing is persisted for a turn until both the
//! verdict and the reply exist, so a rejected input leaves no half-written
//! record and no gap in turn numbering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::guard::{CompletenessReport, FinalizeGuard, GuardConfig};
use crate::guardrail::{AdmissibilityVerdict, BlockReason, Guardrail, ResponseStrategy};
use crate::holistic::HolisticEvaluator;
use crate::judge::{run_submission, ExecutionReport, JudgeClient, Submission};
use crate::llm::{ChatRequest, InferenceClient, Message, RetryPolicy};
use crate::metrics;
use crate::model::{ConversationSession, FinalScore, HolisticResult, SessionState, Turn};
use crate::pipeline::{EvaluatorConfig, TaskRegistry, TurnEvaluator};
use crate::scoring;
use crate::store::{ArchiveStore, SessionStore};

/// Reply-writer system prompts, selected by the guardrail's strategy tag.
fn strategy_prompt(strategy: ResponseStrategy) -> &'static str {
    match strategy {
        ResponseStrategy::SyntaxGuide => {
            "You are a coding tutor. Answer with syntax guidance only; do not \
             reveal algorithmic logic or write solution code."
        }
        ResponseStrategy::LogicHint => {
            "You are a coding tutor. Give one conceptual hint toward the \
             algorithmic idea. No code."
        }
        ResponseStrategy::Roadmap => {
            "You are a coding tutor. Lay out a numbered step roadmap for \
             solving the problem, without writing code."
        }
        ResponseStrategy::InterfaceOnly => {
            "You are a coding tutor. Provide function signatures and data \
             structure outlines only; leave bodies unimplemented."
        }
        ResponseStrategy::FullCode => {
            "You are a coding tutor. The conversation justifies complete \
             code; provide it with a short explanation."
        }
    }
}

/// Fixed refusal replies for blocked turns; no inference is spent on them.
fn refusal_reply(reason: BlockReason) -> &'static str {
    match reason {
        BlockReason::DirectAnswer => {
            "I can't hand over the solution outright, but I'm glad to guide \
             you through it. What have you tried so far?"
        }
        BlockReason::Jailbreak => {
            "I'll keep operating as your coding tutor. Let's get back to the \
             problem."
        }
        BlockReason::OffTopic => {
            "That's outside this practice session. Shall we continue with \
             the problem?"
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model for guardrail, reply, and holistic calls; empty uses the
    /// client default.
    pub model: String,
    /// Turn evaluator settings.
    pub evaluator: EvaluatorConfig,
    /// Finalize guard timing budget.
    pub guard: GuardConfig,
    /// Poll interval while waiting on the judge.
    pub judge_poll_interval: Duration,
    /// Total budget for judging a submission.
    pub judge_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            evaluator: EvaluatorConfig::default(),
            guard: GuardConfig::default(),
            judge_poll_interval: Duration::from_millis(500),
            judge_deadline: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model for orchestrator-owned calls.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the guard timing budget.
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// Sets the evaluator settings.
    pub fn with_evaluator(mut self, evaluator: EvaluatorConfig) -> Self {
        self.evaluator = evaluator;
        self
    }
}

/// The conversation orchestrator.
pub struct ConversationOrchestrator {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn InferenceClient>,
    judge: Arc<dyn JudgeClient>,
    archive: Option<Arc<ArchiveStore>>,
    guardrail: Guardrail,
    evaluator: Arc<TurnEvaluator>,
    guard: FinalizeGuard,
    holistic: HolisticEvaluator,
    registry: Arc<TaskRegistry>,
    reply_retry: RetryPolicy,
    judge_retry: RetryPolicy,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn InferenceClient>,
        judge: Arc<dyn JudgeClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let evaluator = Arc::new(TurnEvaluator::new(
            Arc::clone(&llm),
            Arc::clone(&store),
            config.evaluator.clone(),
        ));
        let guard = FinalizeGuard::new(
            Arc::clone(&store),
            Arc::clone(&evaluator),
            config.guard.clone(),
        );
        Self {
            guardrail: Guardrail::new(Arc::clone(&llm), config.model.clone()),
            holistic: HolisticEvaluator::new(Arc::clone(&llm), config.model.clone()),
            registry: Arc::new(TaskRegistry::new()),
            reply_retry: RetryPolicy::new(2),
            judge_retry: RetryPolicy::new(2).with_base_delay(Duration::from_millis(250)),
            evaluator,
            guard,
            store,
            llm,
            judge,
            archive: None,
            config,
        }
    }

    /// Attaches the durable archive written at finalize completion.
    pub fn with_archive(mut self, archive: Arc<ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// The task registry, queryable for dispatch status.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Creates a new session.
    pub async fn start_session(
        &self,
        problem: Option<String>,
    ) -> Result<ConversationSession, SessionError> {
        let session = ConversationSession::new(problem);
        self.store.create_session(&session).await?;
        info!(session = %session.id, "Session started");
        Ok(session)
    }

    /// Accepts one user input and returns the reply.
    ///
    /// Every accepted input increments the turn counter and dispatches
    /// exactly one evaluation task, blocked turns included. A guardrail or
    /// reply failure rejects the input with a retryable error before
    /// anything is persisted.
    pub async fn accept_input(
        &self,
        session_id: Uuid,
        text: &str,
    ) -> Result<String, SessionError> {
        let session = self
            .store
            .fetch_session(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))?;
        if !session.is_open() {
            return Err(SessionError::NotOpen {
                id: session_id,
                state: session.state.to_string(),
            });
        }

        let verdict = self
            .guardrail
            .check(text, session.problem.as_deref())
            .await
            .map_err(|e| SessionError::GuardrailUnavailable(e.to_string()))?;

        let (reply, blocked) = if verdict.admissible {
            let reply = self.write_reply(&session, text, &verdict).await?;
            (reply, false)
        } else {
            let reason = verdict.block_reason.unwrap_or(BlockReason::OffTopic);
            info!(session = %session_id, reason = ?reason, "Turn blocked by guardrail");
            (refusal_reply(reason).to_string(), true)
        };

        // Acceptance point: from here the turn exists and must be numbered,
        // persisted and dispatched exactly once.
        let number = self.store.next_turn_number(session_id).await?;
        let turn = Turn::new(number, text, reply.clone(), blocked);
        self.store.put_turn(session_id, &turn).await?;

        let evaluator = Arc::clone(&self.evaluator);
        let handle = tokio::spawn(async move {
            evaluator.evaluate(session_id, number).await;
        });
        self.registry.register(session_id, number, handle);

        info!(session = %session_id, turn = number, blocked, "Turn accepted and evaluation dispatched");
        Ok(reply)
    }

    /// Finalizes the session against a code submission and returns the
    /// immutable final score.
    pub async fn request_finalize(
        &self,
        session_id: Uuid,
        submission: &Submission,
    ) -> Result<FinalScore, SessionError> {
        let started = Instant::now();
        let session = self
            .store
            .fetch_session(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))?;

        let began = self
            .store
            .transition_session(session_id, SessionState::Open, SessionState::Finalizing)
            .await?;
        if !began {
            // Lost the lifecycle CAS; report the state that actually won.
            let current = self.store.fetch_session(session_id).await?.map(|s| s.state);
            return match current {
                Some(SessionState::Finalizing) => {
                    Err(SessionError::FinalizeInProgress(session_id))
                }
                Some(state) => Err(SessionError::NotOpen {
                    id: session_id,
                    state: state.to_string(),
                }),
                None => Err(SessionError::NotFound(session_id)),
            };
        }

        let report = self.guard.await_completion(session_id).await?;
        let turns = self.store.list_turns(session_id).await?;

        let holistic = self.run_holistic(&session, &turns, &report).await;
        let execution = self.run_judge(submission).await;

        let turn_mean = scoring::turn_mean(&report.scores());
        let prompt = scoring::prompt_dimension(holistic.overall, turn_mean);
        let performance = scoring::performance_score(&execution);
        let correctness = scoring::correctness_score(&execution);
        let score = scoring::final_score(
            session_id,
            prompt,
            performance,
            correctness,
            report.all_turns_scored,
        );

        if let Some(archive) = &self.archive {
            if let Err(e) = archive
                .archive_session(&session, &turns, &holistic, &score)
                .await
            {
                // Audit-only store: a write failure must not deprive the
                // caller of a result.
                error!(session = %session_id, error = %e, "Failed to archive finalized session");
            }
        }

        let _ = self
            .store
            .transition_session(session_id, SessionState::Finalizing, SessionState::Closed)
            .await?;
        self.store.delete_session(session_id).await?;
        let abandoned = self.registry.remove_session(session_id);

        metrics::record_finalize_seconds(started.elapsed().as_secs_f64());
        info!(
            session = %session_id,
            total = score.total,
            grade = %score.grade,
            all_turns_scored = score.all_turns_scored,
            abandoned_tasks = abandoned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finalized"
        );
        Ok(score)
    }

    /// Writes the reply for an admissible input under the verdict's
    /// strategy. Failure rejects the turn before any state exists.
    async fn write_reply(
        &self,
        session: &ConversationSession,
        text: &str,
        verdict: &AdmissibilityVerdict,
    ) -> Result<String, SessionError> {
        let strategy = verdict.strategy.unwrap_or_default();
        let mut user = String::new();
        if let Some(problem) = &session.problem {
            user.push_str("Problem:\n");
            user.push_str(problem);
            user.push_str("\n\n");
        }
        user.push_str(text);

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![Message::system(strategy_prompt(strategy)), Message::user(user)],
        )
        .with_temperature(0.7)
        .with_max_tokens(1000);

        let response = self
            .reply_retry
            .run(
                || self.llm.complete(request.clone()),
                crate::error::LlmError::is_transient,
            )
            .await
            .map_err(|e| SessionError::ReplyUnavailable(e.to_string()))?;
        Ok(response.content)
    }

    /// Runs the holistic evaluation, degrading to the turn-mean fallback so
    /// finalize always proceeds.
    async fn run_holistic(
        &self,
        session: &ConversationSession,
        turns: &[Turn],
        report: &CompletenessReport,
    ) -> HolisticResult {
        match self
            .holistic
            .evaluate(session.problem.as_deref(), turns)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(session = %session.id, error = %e, "Holistic evaluation failed, using fallback");
                HolisticResult::fallback(scoring::turn_mean(&report.scores()))
            }
        }
    }

    /// Runs the submission through the judge; an unreachable judge yields
    /// an all-errored report rather than failing finalize.
    async fn run_judge(&self, submission: &Submission) -> ExecutionReport {
        if submission.test_cases.is_empty() {
            return ExecutionReport::default();
        }
        match run_submission(
            self.judge.as_ref(),
            submission,
            &self.judge_retry,
            self.config.judge_poll_interval,
            self.config.judge_deadline,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Judging failed, recording errored report");
                ExecutionReport::all_errored(submission.test_cases.len(), submission.cpu_time_limit)
            }
        }
    }
}
