//! Redis-backed session store.
//!
//! # Key layout
//!
//! - `{prefix}:session:{id}`: session record (JSON)
//! - `{prefix}:session:{id}:counter`: turn acceptance counter (INCR)
//! - `{prefix}:session:{id}:turn:{n}`: turn record (JSON)
//!
//! All keys carry the session TTL. The compare-and-set operations (claim,
//! terminal write, lifecycle transition) run as Lua scripts so the
//! read-check-write is atomic on the server; no locks are held across any
//! call. The scripts match the status substring of the compact JSON rather
//! than re-encoding the record: user text inside JSON strings has its
//! quotes escaped, so the `"status":"..."` needle cannot occur in content.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ConversationSession, SessionState, Turn, TurnOutcome};

use super::SessionStore;

/// Claim CAS: pending -> in_flight. KEYS[1] = turn key.
/// Returns 1 on claim win, 0 when the claim is already held, -1 on a
/// missing key.
const CLAIM_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
if not string.find(raw, '"status":"pending"', 1, true) then return 0 end
local updated = string.gsub(raw, '"status":"pending"', '"status":"in_flight"', 1)
redis.call('SET', KEYS[1], updated, 'KEEPTTL')
return 1
"#;

/// Terminal-write CAS: replace the record with ARGV[1] unless already
/// terminal. KEYS[1] = turn key. Returns 1 when the write landed, 0 on the
/// no-op path, -1 on a missing key.
const FINISH_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
if string.find(raw, '"status":"complete"', 1, true) then return 0 end
if string.find(raw, '"status":"failed"', 1, true) then return 0 end
redis.call('SET', KEYS[1], ARGV[1], 'KEEPTTL')
return 1
"#;

/// Session-state CAS. KEYS[1] = session key, ARGV[1] = expected state
/// needle, ARGV[2] = replacement record JSON.
const TRANSITION_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
if not string.find(raw, ARGV[1], 1, true) then return 0 end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
return 1
"#;

/// Redis implementation of [`SessionStore`].
pub struct RedisSessionStore {
    redis: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl RedisSessionStore {
    /// Connects to Redis.
    pub async fn connect(redis_url: &str, prefix: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            redis,
            prefix: prefix.to_string(),
            ttl,
        })
    }

    /// Creates a store from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str, ttl: Duration) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            ttl,
        }
    }

    fn session_key(&self, id: Uuid) -> String {
        format!("{}:session:{}", self.prefix, id)
    }

    fn counter_key(&self, id: Uuid) -> String {
        format!("{}:session:{}:counter", self.prefix, id)
    }

    fn turn_key(&self, id: Uuid, number: u32) -> String {
        format!("{}:session:{}:turn:{}", self.prefix, id, number)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn set_with_ttl(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(raw)
    }

    /// The needle the transition script checks, per state.
    fn state_needle(state: SessionState) -> String {
        format!("\"state\":\"{}\"", state)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(session)?;
        self.set_with_ttl(&self.session_key(session.id), serialized)
            .await
    }

    async fn fetch_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        match self.get_raw(&self.session_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn transition_session(
        &self,
        id: Uuid,
        from: SessionState,
        to: SessionState,
    ) -> Result<bool, StoreError> {
        let mut session = self
            .fetch_session(id)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?;
        session.state = to;
        let replacement = serde_json::to_string(&session)?;

        let mut conn = self.redis.clone();
        let result: i64 = Script::new(TRANSITION_SCRIPT)
            .key(self.session_key(id))
            .arg(Self::state_needle(from))
            .arg(replacement)
            .invoke_async(&mut conn)
            .await?;
        if result < 0 {
            return Err(StoreError::SessionNotFound(id));
        }
        Ok(result == 1)
    }

    async fn next_turn_number(&self, id: Uuid) -> Result<u32, StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.session_key(id))
            .query_async(&mut conn)
            .await?;
        if !exists {
            return Err(StoreError::SessionNotFound(id));
        }
        let number: u32 = redis::cmd("INCR")
            .arg(self.counter_key(id))
            .query_async(&mut conn)
            .await?;
        redis::cmd("EXPIRE")
            .arg(self.counter_key(id))
            .arg(self.ttl_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(number)
    }

    async fn put_turn(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(turn)?;
        self.set_with_ttl(&self.turn_key(id, turn.number), serialized)
            .await
    }

    async fn fetch_turn(&self, id: Uuid, number: u32) -> Result<Option<Turn>, StoreError> {
        match self.get_raw(&self.turn_key(id, number)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn list_turns(&self, id: Uuid) -> Result<Vec<Turn>, StoreError> {
        let mut conn = self.redis.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(self.counter_key(id))
            .query_async(&mut conn)
            .await?;
        let count = count.unwrap_or(0);
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut mget = redis::cmd("MGET");
        for n in 1..=count {
            mget.arg(self.turn_key(id, n));
        }
        let raws: Vec<Option<String>> = mget.query_async(&mut conn).await?;
        let mut turns = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            turns.push(serde_json::from_str(&raw)?);
        }
        Ok(turns)
    }

    async fn claim_turn(&self, id: Uuid, number: u32) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let result: i64 = Script::new(CLAIM_SCRIPT)
            .key(self.turn_key(id, number))
            .invoke_async(&mut conn)
            .await?;
        if result < 0 {
            return Err(StoreError::TurnNotFound { session: id, turn: number });
        }
        Ok(result == 1)
    }

    async fn finish_turn(
        &self,
        id: Uuid,
        number: u32,
        outcome: &TurnOutcome,
    ) -> Result<bool, StoreError> {
        let mut turn = self
            .fetch_turn(id, number)
            .await?
            .ok_or(StoreError::TurnNotFound { session: id, turn: number })?;
        if turn.status.is_terminal() {
            return Ok(false);
        }
        turn.apply_outcome(outcome);
        let replacement = serde_json::to_string(&turn)?;

        let mut conn = self.redis.clone();
        let result: i64 = Script::new(FINISH_SCRIPT)
            .key(self.turn_key(id, number))
            .arg(replacement)
            .invoke_async(&mut conn)
            .await?;
        if result < 0 {
            return Err(StoreError::TurnNotFound { session: id, turn: number });
        }
        Ok(result == 1)
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(self.counter_key(id))
            .query_async(&mut conn)
            .await?;

        let mut del = redis::cmd("DEL");
        del.arg(self.session_key(id)).arg(self.counter_key(id));
        for n in 1..=count.unwrap_or(0) {
            del.arg(self.turn_key(id, n));
        }
        del.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
