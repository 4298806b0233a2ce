//! Ephemeral session store.
//!
//! The store is the system of record while a session is live, and it owns
//! the two compare-and-set operations the whole concurrency model leans on:
//! the evaluation claim (`Pending -> InFlight`) and the terminal turn write
//! (only lands on a still-open record). Components receive the store as an
//! injected `Arc<dyn SessionStore>` handle; there are no module-level
//! singletons.

pub mod archive;
pub mod redis;

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ConversationSession, SessionState, Turn, TurnOutcome, TurnStatus};

pub use archive::ArchiveStore;
pub use self::redis::RedisSessionStore;

/// Keyed store for live sessions and their turns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session record with the configured TTL.
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError>;

    /// Fetches a session, `None` if missing or expired.
    async fn fetch_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError>;

    /// Transitions the session lifecycle state if it currently equals
    /// `from`; returns whether the transition was applied.
    async fn transition_session(
        &self,
        id: Uuid,
        from: SessionState,
        to: SessionState,
    ) -> Result<bool, StoreError>;

    /// Atomically increments and returns the session's turn counter. This
    /// is the acceptance-ordering mechanism: turn N+1 cannot exist before
    /// turn N was numbered.
    async fn next_turn_number(&self, id: Uuid) -> Result<u32, StoreError>;

    /// Writes a freshly accepted turn record.
    async fn put_turn(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError>;

    /// Fetches one turn.
    async fn fetch_turn(&self, id: Uuid, number: u32) -> Result<Option<Turn>, StoreError>;

    /// Fetches all turns of a session, ordered by number.
    async fn list_turns(&self, id: Uuid) -> Result<Vec<Turn>, StoreError>;

    /// Compare-and-set claim: `Pending -> InFlight`. Returns `true` when
    /// this caller won the claim. Exactly one concurrent claimant wins;
    /// losers must not issue external calls for this turn.
    async fn claim_turn(&self, id: Uuid, number: u32) -> Result<bool, StoreError>;

    /// Compare-and-set terminal write: applies `outcome` only if the turn
    /// is not already terminal. Returns `true` when the write landed. A
    /// `false` return is the harmless no-op taken by late-arriving
    /// abandoned evaluations.
    async fn finish_turn(
        &self,
        id: Uuid,
        number: u32,
        outcome: &TurnOutcome,
    ) -> Result<bool, StoreError>;

    /// Deletes all ephemeral state for a session.
    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError>;
}

/// In-memory store used by tests and single-process runs.
///
/// Lock discipline: the `RwLock` is only held across pure map operations,
/// never across an await point.
pub struct MemoryStore {
    inner: RwLock<HashMap<Uuid, SessionEntry>>,
    ttl: Duration,
}

struct SessionEntry {
    session: ConversationSession,
    counter: u32,
    turns: BTreeMap<u32, Turn>,
    expires_at: Instant,
}

impl MemoryStore {
    /// Creates a store with the given session TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_live(entry: &SessionEntry) -> bool {
        Instant::now() < entry.expires_at
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.insert(
            session.id,
            SessionEntry {
                session: session.clone(),
                counter: 0,
                turns: BTreeMap::new(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn fetch_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .get(&id)
            .filter(|e| Self::is_live(e))
            .map(|e| e.session.clone()))
    }

    async fn transition_session(
        &self,
        id: Uuid,
        from: SessionState,
        to: SessionState,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let entry = inner
            .get_mut(&id)
            .filter(|e| Self::is_live(e))
            .ok_or(StoreError::SessionNotFound(id))?;
        if entry.session.state != from {
            return Ok(false);
        }
        entry.session.state = to;
        Ok(true)
    }

    async fn next_turn_number(&self, id: Uuid) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let entry = inner
            .get_mut(&id)
            .filter(|e| Self::is_live(e))
            .ok_or(StoreError::SessionNotFound(id))?;
        entry.counter += 1;
        entry.session.turn_count = entry.counter;
        Ok(entry.counter)
    }

    async fn put_turn(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let entry = inner
            .get_mut(&id)
            .filter(|e| Self::is_live(e))
            .ok_or(StoreError::SessionNotFound(id))?;
        entry.turns.insert(turn.number, turn.clone());
        Ok(())
    }

    async fn fetch_turn(&self, id: Uuid, number: u32) -> Result<Option<Turn>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .get(&id)
            .filter(|e| Self::is_live(e))
            .and_then(|e| e.turns.get(&number).cloned()))
    }

    async fn list_turns(&self, id: Uuid) -> Result<Vec<Turn>, StoreError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .get(&id)
            .filter(|e| Self::is_live(e))
            .map(|e| e.turns.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn claim_turn(&self, id: Uuid, number: u32) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let entry = inner
            .get_mut(&id)
            .filter(|e| Self::is_live(e))
            .ok_or(StoreError::SessionNotFound(id))?;
        let turn = entry
            .turns
            .get_mut(&number)
            .ok_or(StoreError::TurnNotFound { session: id, turn: number })?;
        if turn.status != TurnStatus::Pending {
            return Ok(false);
        }
        turn.status = TurnStatus::InFlight;
        Ok(true)
    }

    async fn finish_turn(
        &self,
        id: Uuid,
        number: u32,
        outcome: &TurnOutcome,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let entry = inner
            .get_mut(&id)
            .filter(|e| Self::is_live(e))
            .ok_or(StoreError::SessionNotFound(id))?;
        let turn = entry
            .turns
            .get_mut(&number)
            .ok_or(StoreError::TurnNotFound { session: id, turn: number })?;
        if turn.status.is_terminal() {
            return Ok(false);
        }
        turn.apply_outcome(outcome);
        Ok(true)
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Intent;
    use std::sync::Arc;

    fn store() -> MemoryStore {
        MemoryStore::default()
    }

    async fn seeded(store: &MemoryStore) -> Uuid {
        let session = ConversationSession::new(None);
        let id = session.id;
        store.create_session(&session).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store();
        let id = seeded(&store).await;

        let fetched = store.fetch_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert!(fetched.is_open());

        store.delete_session(id).await.unwrap();
        assert!(store.fetch_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_gone() {
        let store = MemoryStore::new(Duration::ZERO);
        let session = ConversationSession::new(None);
        store.create_session(&session).await.unwrap();
        assert!(store.fetch_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_turn_counter_is_contiguous() {
        let store = store();
        let id = seeded(&store).await;

        for expected in 1..=5 {
            assert_eq!(store.next_turn_number(id).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_counter_is_atomic_under_concurrency() {
        let store = Arc::new(store());
        let id = seeded(&store).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.next_turn_number(id).await.unwrap() },
            ));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = store();
        let id = seeded(&store).await;
        let number = store.next_turn_number(id).await.unwrap();
        store
            .put_turn(id, &Turn::new(number, "in", "out", false))
            .await
            .unwrap();

        assert!(store.claim_turn(id, number).await.unwrap());
        assert!(!store.claim_turn(id, number).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(store());
        let id = seeded(&store).await;
        let number = store.next_turn_number(id).await.unwrap();
        store
            .put_turn(id, &Turn::new(number, "in", "out", false))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.claim_turn(id, number).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_finish_turn_cas_ignores_late_writer() {
        let store = store();
        let id = seeded(&store).await;
        let number = store.next_turn_number(id).await.unwrap();
        store
            .put_turn(id, &Turn::new(number, "in", "out", false))
            .await
            .unwrap();
        store.claim_turn(id, number).await.unwrap();

        let first = TurnOutcome::complete(75.0, Intent::Generation, vec![], "first".into());
        assert!(store.finish_turn(id, number, &first).await.unwrap());

        // A late abandoned evaluation tries to land a different result.
        let late = TurnOutcome::complete(20.0, Intent::Debugging, vec![], "late".into());
        assert!(!store.finish_turn(id, number, &late).await.unwrap());

        let turn = store.fetch_turn(id, number).await.unwrap().unwrap();
        assert_eq!(turn.score, Some(75.0));
        assert_eq!(turn.rationale, "first");
    }

    #[tokio::test]
    async fn test_finish_preserves_content_fields() {
        let store = store();
        let id = seeded(&store).await;
        let number = store.next_turn_number(id).await.unwrap();
        store
            .put_turn(id, &Turn::new(number, "the input", "the reply", true))
            .await
            .unwrap();

        store
            .finish_turn(id, number, &TurnOutcome::blocked_zero())
            .await
            .unwrap();

        let turn = store.fetch_turn(id, number).await.unwrap().unwrap();
        assert_eq!(turn.input, "the input");
        assert_eq!(turn.reply, "the reply");
        assert!(turn.blocked);
        assert_eq!(turn.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_list_turns_is_ordered() {
        let store = store();
        let id = seeded(&store).await;
        for _ in 0..3 {
            let n = store.next_turn_number(id).await.unwrap();
            store
                .put_turn(id, &Turn::new(n, format!("input {}", n), "reply", false))
                .await
                .unwrap();
        }

        let turns = store.list_turns(id).await.unwrap();
        let numbers: Vec<u32> = turns.iter().map(|t| t.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_session_state_transition_cas() {
        let store = store();
        let id = seeded(&store).await;

        assert!(store
            .transition_session(id, SessionState::Open, SessionState::Finalizing)
            .await
            .unwrap());
        // Second finalize attempt loses the CAS.
        assert!(!store
            .transition_session(id, SessionState::Open, SessionState::Finalizing)
            .await
            .unwrap());
        assert!(store
            .transition_session(id, SessionState::Finalizing, SessionState::Closed)
            .await
            .unwrap());
    }
}
