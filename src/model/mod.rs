//! Shared data model: sessions, turns, intents and scores.

pub mod intent;
pub mod score;
pub mod session;
pub mod turn;

pub use intent::{resolve as resolve_intent, Intent, INTENT_PRIORITY};
pub use score::{FinalScore, Grade, HolisticResult};
pub use session::{ConversationSession, SessionState};
pub use turn::{RubricCriterion, RubricScore, Turn, TurnOutcome, TurnStatus};
