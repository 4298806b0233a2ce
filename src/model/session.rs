//! Conversation session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting input.
    Open,
    /// A finalize request is assembling the result.
    Finalizing,
    /// Finalized; ephemeral state may be reclaimed.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Open => write!(f, "open"),
            SessionState::Finalizing => write!(f, "finalizing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// A multi-turn problem-solving session.
///
/// Turns are stored individually under (session, turn number); the session
/// record carries the lifecycle state and the acceptance counter's last
/// observed value. The counter itself lives in the store so the increment
/// is atomic across concurrent callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Unique session identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub state: SessionState,
    /// Number of accepted turns.
    pub turn_count: u32,
    /// Problem statement the session is working against, if any.
    #[serde(default)]
    pub problem: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Creates a new open session.
    pub fn new(problem: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Open,
            turn_count: 0,
            problem,
            created_at: Utc::now(),
        }
    }

    /// Whether the session still accepts input.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}
