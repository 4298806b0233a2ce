//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use crate::config::ServiceConfig;
use crate::guard::GuardConfig;
use crate::judge::{HttpJudgeClient, Submission};
use crate::llm::HttpInferenceClient;
use crate::metrics;
use crate::orchestrator::{ConversationOrchestrator, OrchestratorConfig};
use crate::store::{ArchiveStore, MemoryStore, RedisSessionStore, SessionStore};

/// convgrade: conversational problem-solving grader.
#[derive(Debug, Parser)]
#[command(name = "convgrade", version, about)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "CONVGRADE_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a recorded transcript through the full pipeline and print
    /// the final score.
    Replay {
        /// Path to the transcript JSON file.
        #[arg(long)]
        transcript: PathBuf,

        /// Pretty-print the final score.
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },

    /// Print the loaded configuration and exit.
    CheckConfig,
}

/// A recorded session to replay.
#[derive(Debug, Deserialize)]
struct Transcript {
    #[serde(default)]
    problem: Option<String>,
    turns: Vec<String>,
    submission: TranscriptSubmission,
}

#[derive(Debug, Deserialize)]
struct TranscriptSubmission {
    source: String,
    language: String,
    #[serde(default)]
    test_cases: Vec<TranscriptCase>,
}

#[derive(Debug, Deserialize)]
struct TranscriptCase {
    stdin: String,
    expected_output: String,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Replay { transcript, pretty } => replay(transcript, pretty).await,
        Commands::CheckConfig => {
            let config = ServiceConfig::from_env()?;
            config.validate()?;
            println!("{:#?}", config);
            Ok(())
        }
    }
}

async fn replay(path: PathBuf, pretty: bool) -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    config.validate()?;
    let _ = metrics::init_metrics();

    let raw = tokio::fs::read_to_string(&path).await?;
    let transcript: Transcript = serde_json::from_str(&raw)?;

    let llm = Arc::new(HttpInferenceClient::new(
        config.api_base.clone(),
        config.api_key.clone(),
        config.model.clone(),
    ));

    let judge: Arc<dyn crate::judge::JudgeClient> = match &config.judge_url {
        Some(url) => Arc::new(HttpJudgeClient::new(url.clone(), config.judge_key.clone())),
        None => anyhow::bail!("CONVGRADE_JUDGE_URL must be set to replay a submission"),
    };

    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisSessionStore::connect(url, "convgrade", config.session_ttl).await?,
        ),
        None => Arc::new(MemoryStore::new(config.session_ttl)),
    };

    let orchestrator_config = OrchestratorConfig::new()
        .with_model(config.model.clone())
        .with_guard(relaxed_guard(&config.guard));
    let mut orchestrator =
        ConversationOrchestrator::new(store, llm, judge, orchestrator_config);

    if let Some(database_url) = &config.database_url {
        let archive = ArchiveStore::connect(database_url).await?;
        orchestrator = orchestrator.with_archive(Arc::new(archive));
    }

    let session = orchestrator.start_session(transcript.problem.clone()).await?;
    info!(session = %session.id, turns = transcript.turns.len(), "Replaying transcript");

    for (index, input) in transcript.turns.iter().enumerate() {
        let reply = orchestrator.accept_input(session.id, input).await?;
        println!("--- turn {} ---", index + 1);
        println!("user: {}", input);
        println!("reply: {}\n", reply);
    }

    let mut submission =
        Submission::new(transcript.submission.source, transcript.submission.language);
    for case in transcript.submission.test_cases {
        submission = submission.with_test_case(case.stdin, case.expected_output);
    }

    let score = orchestrator.request_finalize(session.id, &submission).await?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&score)?
    } else {
        serde_json::to_string(&score)?
    };
    println!("{}", rendered);
    Ok(())
}

/// Replay is interactive tooling: give background evaluation a little more
/// room before the guard starts recomputing.
fn relaxed_guard(base: &GuardConfig) -> GuardConfig {
    base.clone().with_poll_interval(Duration::from_millis(200))
}
