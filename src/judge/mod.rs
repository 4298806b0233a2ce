//! Code judging client.
//!
//! Submissions are pushed through an enqueue / poll-status / fetch-result
//! abstraction so execution workers scale independently of the orchestrator
//! process. The HTTP implementation targets a Judge0-compatible API; tests
//! and offline runs substitute their own [`JudgeClient`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::JudgeError;
use crate::llm::RetryPolicy;

/// Default per-request HTTP timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Judge0 language ids for the languages the grader accepts.
const LANGUAGE_IDS: &[(&str, u32)] = &[
    ("python", 71),
    ("python3", 71),
    ("java", 62),
    ("cpp", 54),
    ("c++", 54),
    ("c", 50),
    ("javascript", 63),
    ("nodejs", 63),
    ("go", 60),
    ("rust", 73),
];

/// One test case to run a submission against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Standard input fed to the program.
    pub stdin: String,
    /// Expected standard output.
    pub expected_output: String,
}

/// A code submission to judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Source code.
    pub source: String,
    /// Language name (e.g., "python", "rust").
    pub language: String,
    /// Test cases to run.
    pub test_cases: Vec<TestCase>,
    /// CPU time limit per case, in seconds.
    pub cpu_time_limit: f64,
    /// Memory limit per case, in kilobytes.
    pub memory_limit_kb: u32,
}

impl Submission {
    /// Creates a submission with default limits (5s CPU, 128MB).
    pub fn new(source: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
            test_cases: Vec::new(),
            cpu_time_limit: 5.0,
            memory_limit_kb: 128 * 1024,
        }
    }

    /// Adds a test case.
    pub fn with_test_case(mut self, stdin: impl Into<String>, expected: impl Into<String>) -> Self {
        self.test_cases.push(TestCase {
            stdin: stdin.into(),
            expected_output: expected.into(),
        });
        self
    }
}

/// Verdict for one judged test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeVerdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
}

impl JudgeVerdict {
    /// Maps a Judge0 status id onto a verdict.
    fn from_status_id(id: u32) -> Self {
        match id {
            3 => JudgeVerdict::Accepted,
            4 => JudgeVerdict::WrongAnswer,
            5 => JudgeVerdict::TimeLimitExceeded,
            6 => JudgeVerdict::CompileError,
            7..=12 => JudgeVerdict::RuntimeError,
            _ => JudgeVerdict::InternalError,
        }
    }
}

/// Queue status of an enqueued submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeStatus {
    Queued,
    Running,
    Done,
}

/// Result of judging one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    /// Verdict for this case.
    pub verdict: JudgeVerdict,
    /// Program standard output.
    pub stdout: String,
    /// Wall time used, in seconds.
    pub time_secs: f64,
    /// Memory used, in kilobytes.
    pub memory_kb: u32,
}

/// Execution report: one result per test case, in submission order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub results: Vec<CaseResult>,
    /// CPU limit the cases ran under, for performance scoring.
    pub cpu_time_limit: f64,
}

impl ExecutionReport {
    /// Number of accepted cases.
    pub fn accepted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.verdict == JudgeVerdict::Accepted)
            .count()
    }

    /// A report where every case failed before running, used when the
    /// judging service itself was unreachable.
    pub fn all_errored(cases: usize, cpu_time_limit: f64) -> Self {
        Self {
            results: (0..cases)
                .map(|_| CaseResult {
                    verdict: JudgeVerdict::InternalError,
                    stdout: String::new(),
                    time_secs: 0.0,
                    memory_kb: 0,
                })
                .collect(),
            cpu_time_limit,
        }
    }
}

/// Trait for code judging capabilities.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Enqueues one test case of a submission; returns an opaque token.
    async fn enqueue(&self, submission: &Submission, case: usize) -> Result<String, JudgeError>;

    /// Polls the queue status of a token.
    async fn status(&self, token: &str) -> Result<JudgeStatus, JudgeError>;

    /// Fetches the result for a finished token.
    async fn fetch(&self, token: &str) -> Result<CaseResult, JudgeError>;
}

/// Runs every test case of a submission to completion, polling each token at
/// `poll_interval` up to `deadline` total.
///
/// Transient enqueue failures are retried under `retry`, the same policy
/// shape the inference client uses. A case whose judging does not finish in
/// time is recorded as an internal error rather than failing the whole
/// report.
pub async fn run_submission(
    client: &dyn JudgeClient,
    submission: &Submission,
    retry: &RetryPolicy,
    poll_interval: Duration,
    deadline: Duration,
) -> Result<ExecutionReport, JudgeError> {
    let mut tokens = Vec::with_capacity(submission.test_cases.len());
    for case in 0..submission.test_cases.len() {
        let token = retry
            .run(|| client.enqueue(submission, case), JudgeError::is_transient)
            .await?;
        tokens.push(token);
    }

    let started = tokio::time::Instant::now();
    let mut results = Vec::with_capacity(tokens.len());
    for token in &tokens {
        loop {
            if started.elapsed() >= deadline {
                debug!(token = %token, "Judging deadline reached, recording internal error");
                results.push(CaseResult {
                    verdict: JudgeVerdict::InternalError,
                    stdout: String::new(),
                    time_secs: 0.0,
                    memory_kb: 0,
                });
                break;
            }
            match client.status(token).await? {
                JudgeStatus::Done => {
                    results.push(client.fetch(token).await?);
                    break;
                }
                JudgeStatus::Queued | JudgeStatus::Running => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    Ok(ExecutionReport {
        results,
        cpu_time_limit: submission.cpu_time_limit,
    })
}

/// HTTP client for Judge0-compatible APIs.
pub struct HttpJudgeClient {
    api_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpJudgeClient {
    /// Creates a client for the given API URL.
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a client from `CONVGRADE_JUDGE_URL` / `CONVGRADE_JUDGE_KEY`.
    pub fn from_env() -> Result<Self, JudgeError> {
        let api_url = std::env::var("CONVGRADE_JUDGE_URL")
            .map_err(|_| JudgeError::RequestFailed("CONVGRADE_JUDGE_URL not set".to_string()))?;
        let api_key = std::env::var("CONVGRADE_JUDGE_KEY").ok();
        Ok(Self::new(api_url, api_key))
    }

    fn language_id(language: &str) -> Result<u32, JudgeError> {
        let lowered = language.to_ascii_lowercase();
        LANGUAGE_IDS
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, id)| *id)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language.to_string()))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-Auth-Token", key),
            None => request,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireSubmission {
    language_id: u32,
    source_code: String,
    stdin: String,
    expected_output: String,
    cpu_time_limit: f64,
    memory_limit: u32,
}

#[derive(Debug, Deserialize)]
struct WireToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    status: WireStatus,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    memory: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    id: u32,
}

#[async_trait]
impl JudgeClient for HttpJudgeClient {
    async fn enqueue(&self, submission: &Submission, case: usize) -> Result<String, JudgeError> {
        let test_case = submission
            .test_cases
            .get(case)
            .ok_or_else(|| JudgeError::SubmissionRejected(format!("no test case {}", case)))?;

        let wire = WireSubmission {
            language_id: Self::language_id(&submission.language)?,
            source_code: BASE64.encode(&submission.source),
            stdin: BASE64.encode(&test_case.stdin),
            expected_output: BASE64.encode(&test_case.expected_output),
            cpu_time_limit: submission.cpu_time_limit,
            memory_limit: submission.memory_limit_kb,
        };

        let url = format!("{}/submissions?base64_encoded=true&wait=false", self.api_url);
        let response = self
            .apply_auth(self.http_client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|e| JudgeError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(JudgeError::RateLimited("submission enqueue".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::SubmissionRejected(format!("{}: {}", status, body)));
        }

        let token: WireToken = response
            .json()
            .await
            .map_err(|e| JudgeError::ParseError(e.to_string()))?;
        Ok(token.token)
    }

    async fn status(&self, token: &str) -> Result<JudgeStatus, JudgeError> {
        let url = format!("{}/submissions/{}?fields=status", self.api_url, token);
        let response = self
            .apply_auth(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| JudgeError::RequestFailed(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Err(JudgeError::SubmissionNotFound(token.to_string()));
        }
        let result: WireResult = response
            .json()
            .await
            .map_err(|e| JudgeError::ParseError(e.to_string()))?;

        // Judge0 statuses: 1 = in queue, 2 = processing, >=3 terminal.
        Ok(match result.status.id {
            1 => JudgeStatus::Queued,
            2 => JudgeStatus::Running,
            _ => JudgeStatus::Done,
        })
    }

    async fn fetch(&self, token: &str) -> Result<CaseResult, JudgeError> {
        let url = format!(
            "{}/submissions/{}?fields=status,stdout,time,memory",
            self.api_url, token
        );
        let response = self
            .apply_auth(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| JudgeError::RequestFailed(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Err(JudgeError::SubmissionNotFound(token.to_string()));
        }
        let result: WireResult = response
            .json()
            .await
            .map_err(|e| JudgeError::ParseError(e.to_string()))?;

        Ok(CaseResult {
            verdict: JudgeVerdict::from_status_id(result.status.id),
            stdout: result.stdout.unwrap_or_default(),
            time_secs: result
                .time
                .and_then(|t| t.parse::<f64>().ok())
                .unwrap_or(0.0),
            memory_kb: result.memory.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_builder() {
        let submission = Submission::new("print(input())", "python")
            .with_test_case("1", "1")
            .with_test_case("2", "2");

        assert_eq!(submission.test_cases.len(), 2);
        assert_eq!(submission.cpu_time_limit, 5.0);
        assert_eq!(submission.memory_limit_kb, 128 * 1024);
    }

    #[test]
    fn test_language_id_lookup() {
        assert_eq!(HttpJudgeClient::language_id("python").unwrap(), 71);
        assert_eq!(HttpJudgeClient::language_id("Rust").unwrap(), 73);
        assert_eq!(HttpJudgeClient::language_id("C++").unwrap(), 54);
        assert!(matches!(
            HttpJudgeClient::language_id("cobol"),
            Err(JudgeError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_verdict_from_status_id() {
        assert_eq!(JudgeVerdict::from_status_id(3), JudgeVerdict::Accepted);
        assert_eq!(JudgeVerdict::from_status_id(4), JudgeVerdict::WrongAnswer);
        assert_eq!(JudgeVerdict::from_status_id(5), JudgeVerdict::TimeLimitExceeded);
        assert_eq!(JudgeVerdict::from_status_id(6), JudgeVerdict::CompileError);
        assert_eq!(JudgeVerdict::from_status_id(11), JudgeVerdict::RuntimeError);
        assert_eq!(JudgeVerdict::from_status_id(13), JudgeVerdict::InternalError);
    }

    #[test]
    fn test_report_accepted_count() {
        let report = ExecutionReport {
            results: vec![
                CaseResult {
                    verdict: JudgeVerdict::Accepted,
                    stdout: "ok".into(),
                    time_secs: 0.1,
                    memory_kb: 1024,
                },
                CaseResult {
                    verdict: JudgeVerdict::WrongAnswer,
                    stdout: "nope".into(),
                    time_secs: 0.1,
                    memory_kb: 1024,
                },
            ],
            cpu_time_limit: 5.0,
        };
        assert_eq!(report.accepted(), 1);
    }

    #[test]
    fn test_all_errored_report() {
        let report = ExecutionReport::all_errored(3, 5.0);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.accepted(), 0);
        assert!(report
            .results
            .iter()
            .all(|r| r.verdict == JudgeVerdict::InternalError));
    }
}
