//! Session Management
//!
//! Sessions and their messages live behind the [`SessionStore`] trait. The
//! orchestrator talks to the store through a [`SessionHandle`] scoped to one run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::identifier::{self, IdKind};
use crate::message::{HistoryEntry, Message, NewMessage, build_history};
use crate::tools::TodoItem;

/// Session lifecycle status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Archived,
}

/// Session metadata and running totals
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,

    /// User/owner ID
    #[serde(default)]
    pub user_id: Option<String>,

    pub agent_id: String,
    pub title: String,

    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,

    /// Accumulated monetary cost
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,

    #[serde(default)]
    pub status: SessionStatus,

    #[serde(default)]
    pub compaction_summary: Option<String>,
    #[serde(default)]
    pub compaction_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(new: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: new.id,
            user_id: new.user_id,
            agent_id: new.agent_id,
            title: new
                .title
                .unwrap_or_else(|| format!("Session {}", now.to_rfc3339())),
            provider_id: new.provider_id,
            model_id: new.model_id,
            cost: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            status: SessionStatus::Active,
            compaction_summary: None,
            compaction_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Parameters for creating a session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSession {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl NewSession {
    /// Fresh session id for the default agent
    pub fn new() -> Self {
        Self::with_id(identifier::ascending(IdKind::Session))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            agent_id: "build".into(),
            title: None,
            provider_id: None,
            model_id: None,
        }
    }

    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }
}

impl Default for NewSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Changes to a session. Absolute fields replace, deltas accumulate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub compaction_summary: Option<String>,

    #[serde(default)]
    pub cost_delta: f64,
    #[serde(default)]
    pub input_tokens_delta: u64,
    #[serde(default)]
    pub output_tokens_delta: u64,
    #[serde(default)]
    pub compaction_increment: u32,
}

impl SessionUpdate {
    /// Accumulate one step's usage
    pub fn usage(cost: f64, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            cost_delta: cost,
            input_tokens_delta: input_tokens,
            output_tokens_delta: output_tokens,
            ..Default::default()
        }
    }

    pub fn apply(self, info: &mut SessionInfo) {
        if let Some(title) = self.title {
            info.title = title;
        }
        if let Some(provider_id) = self.provider_id {
            info.provider_id = Some(provider_id);
        }
        if let Some(model_id) = self.model_id {
            info.model_id = Some(model_id);
        }
        if let Some(agent_id) = self.agent_id {
            info.agent_id = agent_id;
        }
        if let Some(status) = self.status {
            info.status = status;
        }
        if let Some(summary) = self.compaction_summary {
            info.compaction_summary = Some(summary);
        }
        info.cost += self.cost_delta;
        info.input_tokens += self.input_tokens_delta;
        info.output_tokens += self.output_tokens_delta;
        info.compaction_count += self.compaction_increment;
        info.touch();
    }
}

/// A session with its ordered messages and task list, as persisted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub info: SessionInfo,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
}

impl SessionRecord {
    pub fn new(new: NewSession) -> Self {
        Self {
            info: SessionInfo::new(new),
            messages: Vec::new(),
            todos: Vec::new(),
        }
    }

    /// Append a message and bump the activity timestamp
    pub fn append(&mut self, message: NewMessage) -> Message {
        let message = message.into_message(&self.info.id);
        self.messages.push(message.clone());
        self.info.touch();
        message
    }
}

/// Durable session storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Session metadata (if it exists) and its messages in creation order
    async fn load(&self, session_id: &str)
    -> Result<(Option<SessionInfo>, Vec<Message>), StoreError>;

    /// Create a session; fails with `Conflict` when the id is taken
    async fn create(&self, session: NewSession) -> Result<SessionInfo, StoreError>;

    /// Append one message
    async fn save_message(&self, session_id: &str, message: NewMessage)
    -> Result<Message, StoreError>;

    /// Append several messages as one unit
    async fn save_messages(
        &self,
        session_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut saved = Vec::with_capacity(messages.len());
        for message in messages {
            saved.push(self.save_message(session_id, message).await?);
        }
        Ok(saved)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionInfo, StoreError>;

    /// Sessions, most recently updated first
    async fn list(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionInfo>, StoreError>;

    /// Remove the session with its messages and task list
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// The session's task list; empty for an unknown session
    async fn load_todos(&self, session_id: &str) -> Result<Vec<TodoItem>, StoreError>;

    /// Replace the session's task list
    async fn save_todos(&self, session_id: &str, todos: Vec<TodoItem>) -> Result<(), StoreError>;

    /// Session metadata only
    async fn get(&self, session_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self.load(session_id).await?.0)
    }
}

/// Filter and order session infos the way [`SessionStore::list`] promises
pub fn select_sessions(
    sessions: impl IntoIterator<Item = SessionInfo>,
    user_id: Option<&str>,
    limit: Option<usize>,
) -> Vec<SessionInfo> {
    let mut result: Vec<SessionInfo> = sessions
        .into_iter()
        .filter(|s| user_id.is_none_or(|uid| s.user_id.as_deref() == Some(uid)))
        .collect();

    // Sort by updated_at descending
    result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if let Some(limit) = limit {
        result.truncate(limit);
    }
    result
}

/// In-memory session store (for development/testing)
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(
        &self,
        session_id: &str,
    ) -> Result<(Option<SessionInfo>, Vec<Message>), StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).map_or((None, Vec::new()), |r| {
            (Some(r.info.clone()), r.messages.clone())
        }))
    }

    async fn create(&self, session: NewSession) -> Result<SessionInfo, StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        let record = SessionRecord::new(session);
        let info = record.info.clone();
        sessions.insert(info.id.clone(), record);
        Ok(info)
    }

    async fn save_message(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        Ok(record.append(message))
    }

    async fn save_messages(
        &self,
        session_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        Ok(messages.into_iter().map(|m| record.append(m)).collect())
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionInfo, StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        update.apply(&mut record.info);
        Ok(record.info.clone())
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionInfo>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(select_sessions(
            sessions.values().map(|r| r.info.clone()),
            user_id,
            limit,
        ))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }

    async fn load_todos(&self, session_id: &str) -> Result<Vec<TodoItem>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|r| r.todos.clone())
            .unwrap_or_default())
    }

    async fn save_todos(&self, session_id: &str, todos: Vec<TodoItem>) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        record.todos = todos;
        record.info.touch();
        Ok(())
    }
}

/// Store façade for one run over one session
pub struct SessionHandle {
    store: Arc<dyn SessionStore>,
    info: SessionInfo,
}

impl SessionHandle {
    /// Load the session, creating it on first reference
    pub async fn initialize(
        store: Arc<dyn SessionStore>,
        session_id: &str,
        user_id: Option<&str>,
        agent_id: &str,
    ) -> Result<Self, StoreError> {
        let info = match store.get(session_id).await? {
            Some(info) => info,
            None => {
                tracing::debug!(session_id, agent_id, "Creating session on first reference");
                store
                    .create(
                        NewSession::with_id(session_id)
                            .user(user_id.map(Into::into))
                            .agent(agent_id),
                    )
                    .await?
            }
        };
        Ok(Self { store, info })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Metadata as of the last write through this handle
    pub const fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub async fn add_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.store.save_message(&self.info.id, message).await
    }

    pub async fn add_messages(&self, messages: Vec<NewMessage>) -> Result<Vec<Message>, StoreError> {
        self.store.save_messages(&self.info.id, messages).await
    }

    /// Provider-facing history, led by the compaction summary if there is one
    pub async fn get_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let (info, messages) = self.store.load(&self.info.id).await?;
        let mut history = Vec::with_capacity(messages.len() + 1);
        if let Some(summary) = info.and_then(|i| i.compaction_summary) {
            history.push(HistoryEntry::system(summary));
        }
        history.extend(build_history(&messages));
        Ok(history)
    }

    /// Accumulate a step's cost and token counts
    pub async fn update_metadata(
        &mut self,
        cost_delta: f64,
        input_tokens_delta: u64,
        output_tokens_delta: u64,
    ) -> Result<&SessionInfo, StoreError> {
        self.info = self
            .store
            .update_session(
                &self.info.id,
                SessionUpdate::usage(cost_delta, input_tokens_delta, output_tokens_delta),
            )
            .await?;
        Ok(&self.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Part, Role};

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        let info = store.create(NewSession::with_id("ses_1")).await.unwrap();
        assert!(info.title.starts_with("Session "));
        assert_eq!(info.status, SessionStatus::Active);

        store
            .save_message("ses_1", NewMessage::user("hello"))
            .await
            .unwrap();
        let (loaded, messages) = store.load("ses_1").await.unwrap();
        assert_eq!(loaded.unwrap().id, "ses_1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].session_id, "ses_1");

        let (missing, none) = store.load("ses_2").await.unwrap();
        assert!(missing.is_none() && none.is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict_and_missing_session() {
        let store = MemorySessionStore::new();
        store.create(NewSession::with_id("ses_1")).await.unwrap();
        assert!(matches!(
            store.create(NewSession::with_id("ses_1")).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.save_message("nope", NewMessage::user("x")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.delete("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.save_todos("nope", Vec::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_todos_are_dropped_with_the_session() {
        let store = MemorySessionStore::new();
        store.create(NewSession::with_id("ses_1")).await.unwrap();
        let todo: TodoItem = serde_json::from_value(serde_json::json!({
            "id": "1", "content": "Plan", "status": "pending", "priority": "high"
        }))
        .unwrap();
        store.save_todos("ses_1", vec![todo.clone()]).await.unwrap();
        assert_eq!(store.load_todos("ses_1").await.unwrap(), vec![todo]);

        store.delete("ses_1").await.unwrap();
        store.create(NewSession::with_id("ses_1")).await.unwrap();
        assert!(store.load_todos("ses_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_accumulates_deltas() {
        let store = MemorySessionStore::new();
        store.create(NewSession::with_id("ses_1")).await.unwrap();
        store
            .update_session("ses_1", SessionUpdate::usage(0.5, 10, 5))
            .await
            .unwrap();
        let info = store
            .update_session(
                "ses_1",
                SessionUpdate {
                    title: Some("Renamed".into()),
                    ..SessionUpdate::usage(0.25, 1, 2)
                },
            )
            .await
            .unwrap();
        assert!((info.cost - 0.75).abs() < f64::EPSILON);
        assert_eq!((info.input_tokens, info.output_tokens), (11, 7));
        assert_eq!(info.title, "Renamed");
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = MemorySessionStore::new();
        store
            .create(NewSession::with_id("a").user(Some("u1".into())))
            .await
            .unwrap();
        store
            .create(NewSession::with_id("b").user(Some("u2".into())))
            .await
            .unwrap();
        store
            .create(NewSession::with_id("c").user(Some("u1".into())))
            .await
            .unwrap();
        store
            .save_message("a", NewMessage::user("bump"))
            .await
            .unwrap();

        let mine = store.list(Some("u1"), None).await.unwrap();
        let ids: Vec<&str> = mine.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(store.list(None, Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_handle_creates_and_prepends_summary() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let mut handle = SessionHandle::initialize(store.clone(), "ses_x", Some("u"), "build")
            .await
            .unwrap();
        assert_eq!(handle.info().user_id.as_deref(), Some("u"));

        handle.add_message(NewMessage::user("hi")).await.unwrap();
        handle
            .add_message(NewMessage::new(Role::Assistant, vec![Part::text("hello")]))
            .await
            .unwrap();
        store
            .update_session(
                "ses_x",
                SessionUpdate {
                    compaction_summary: Some("earlier talk".into()),
                    compaction_increment: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let history = handle.get_history().await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], HistoryEntry::system("earlier talk"));

        let info = handle.update_metadata(0.1, 3, 4).await.unwrap();
        assert_eq!(info.compaction_count, 1);
        assert_eq!(info.output_tokens, 4);

        // an existing session is reused
        let again = SessionHandle::initialize(store, "ses_x", None, "general")
            .await
            .unwrap();
        assert_eq!(again.info().agent_id, "build");
    }
}
