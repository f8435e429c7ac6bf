//! Session message storage: the external interface the engine consumes,
//! plus one concrete in-process implementation.
//!
//! The persistent store is an external collaborator (it is expected to be
//! backed by a database the engine itself never touches). The sliding
//! window implementation here caps on append rather than summarizing on
//! demand, so it needs no LLM call to stay bounded.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::llm::types::Message;

/// A session's identity and bookkeeping, independent of its message log.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub agent: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The external session message store the engine reads and appends to.
/// A real deployment backs this with a database; the engine never assumes
/// durability beyond what an implementation provides.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, agent: &str, metadata: HashMap<String, serde_json::Value>) -> Result<Session>;
    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn append_messages(&self, session_id: &str, messages: Vec<Message>) -> Result<()>;
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// An in-process sliding-window session store: each session keeps at most
/// `window` messages, dropping the oldest as new ones are appended. Intended
/// for tests, examples, and embedding contexts without a durable backend.
pub struct SlidingWindowSessionStore {
    window: usize,
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl SlidingWindowSessionStore {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            sessions: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for SlidingWindowSessionStore {
    async fn create_session(&self, agent: &str, metadata: HashMap<String, serde_json::Value>) -> Result<Session> {
        let id = Uuid::now_v7().to_string();
        let now = now_unix();
        let session = Session {
            id: id.clone(),
            agent: agent.to_string(),
            created_at: now,
            last_activity: now,
            metadata,
        };
        self.sessions.write().unwrap().insert(id.clone(), session.clone());
        self.messages.write().unwrap().insert(id, Vec::new());
        Ok(session)
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.messages
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("unknown session: {session_id}")))
    }

    async fn append_messages(&self, session_id: &str, new_messages: Vec<Message>) -> Result<()> {
        {
            let mut sessions = self.sessions.write().unwrap();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown session: {session_id}")))?;
            session.last_activity = now_unix();
        }

        let mut messages = self.messages.write().unwrap();
        let log = messages
            .get_mut(session_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown session: {session_id}")))?;
        log.extend(new_messages);

        if log.len() > self.window {
            let drop = log.len() - self.window;
            log.drain(0..drop);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_session_starts_with_an_empty_log() {
        let store = SlidingWindowSessionStore::new(10);
        let session = store.create_session("agent", HashMap::new()).await.unwrap();
        assert!(store.load_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_accumulates_messages_until_the_window_fills() {
        let store = SlidingWindowSessionStore::new(10);
        let session = store.create_session("agent", HashMap::new()).await.unwrap();

        store
            .append_messages(&session.id, vec![Message::user("one"), Message::assistant("two")])
            .await
            .unwrap();

        let messages = store.load_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn appends_beyond_the_window_drop_the_oldest_messages() {
        let store = SlidingWindowSessionStore::new(3);
        let session = store.create_session("agent", HashMap::new()).await.unwrap();

        for i in 0..5 {
            store.append_messages(&session.id, vec![Message::user(format!("m{i}"))]).await.unwrap();
        }

        let messages = store.load_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content.as_deref(), Some("m2"));
        assert_eq!(messages[2].content.as_deref(), Some("m4"));
    }

    #[tokio::test]
    async fn operating_on_an_unknown_session_errs() {
        let store = SlidingWindowSessionStore::new(10);
        assert!(store.load_messages("nonexistent").await.is_err());
    }
}
