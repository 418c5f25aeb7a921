//! JSON file session store.
//!
//! One pretty-printed JSON document per session under a root directory.
//! Every write goes to a temporary file that is renamed over the old one, so a
//! reader never observes a half-written session.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use agent_core::{
    error::StoreError,
    message::{Message, NewMessage},
    session::{NewSession, SessionInfo, SessionRecord, SessionStore, SessionUpdate, select_sessions},
    tools::TodoItem,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Durable session store backed by the filesystem
pub struct JsonFileSessionStore {
    root: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileSessionStore {
    /// Open (and create if needed) the store directory
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Backend(format!("create {}: {e}", root.display())))?;
        tracing::info!(path = %root.display(), "Opened JSON session store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, session_id: &str) -> Option<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| self.root.join(format!("{session_id}.json")))
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let Some(path) = self.path(session_id) else {
            return Ok(None);
        };
        read_record(&path).await
    }

    async fn write(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self
            .path(&record.info.id)
            .ok_or_else(|| StoreError::Backend(format!("invalid session id {}", record.info.id)))?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Backend(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Backend(format!("rename {}: {e}", path.display())))
    }

    async fn existing(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.read(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }
}

async fn read_record(path: &Path) -> Result<Option<SessionRecord>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Backend(format!("read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(
        &self,
        session_id: &str,
    ) -> Result<(Option<SessionInfo>, Vec<Message>), StoreError> {
        Ok(self
            .read(session_id)
            .await?
            .map_or((None, Vec::new()), |r| (Some(r.info), r.messages)))
    }

    async fn create(&self, session: NewSession) -> Result<SessionInfo, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.path(&session.id).is_none() {
            return Err(StoreError::Backend(format!("invalid session id {}", session.id)));
        }
        if self.read(&session.id).await?.is_some() {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        let record = SessionRecord::new(session);
        self.write(&record).await?;
        Ok(record.info)
    }

    async fn save_message(
        &self,
        session_id: &str,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        self.save_messages(session_id, vec![message])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("message was not saved".into()))
    }

    async fn save_messages(
        &self,
        session_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.existing(session_id).await?;
        let saved = messages.into_iter().map(|m| record.append(m)).collect();
        self.write(&record).await?;
        Ok(saved)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionInfo, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.existing(session_id).await?;
        update.apply(&mut record.info);
        self.write(&record).await?;
        Ok(record.info)
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionInfo>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Backend(format!("list {}: {e}", self.root.display())))?;

        let mut infos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(Some(record)) => infos.push(record.info),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session"),
            }
        }

        Ok(select_sessions(infos, user_id, limit))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self
            .path(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("session {session_id}")))
            }
            Err(e) => Err(StoreError::Backend(format!("delete {}: {e}", path.display()))),
        }
    }

    async fn load_todos(&self, session_id: &str) -> Result<Vec<TodoItem>, StoreError> {
        Ok(self
            .read(session_id)
            .await?
            .map(|r| r.todos)
            .unwrap_or_default())
    }

    async fn save_todos(&self, session_id: &str, todos: Vec<TodoItem>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.existing(session_id).await?;
        record.todos = todos;
        record.info.touch();
        self.write(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::message::{Part, Role, StopReason};

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
            store
                .create(NewSession::with_id("ses_1").user(Some("u".into())))
                .await
                .unwrap();
            store
                .save_messages(
                    "ses_1",
                    vec![
                        NewMessage::user("hi"),
                        NewMessage::new(Role::Assistant, vec![Part::text("hello")])
                            .with_finish(StopReason::EndTurn),
                    ],
                )
                .await
                .unwrap();
            store
                .update_session("ses_1", SessionUpdate::usage(0.5, 10, 20))
                .await
                .unwrap();
        }

        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
        let (info, messages) = store.load("ses_1").await.unwrap();
        let info = info.unwrap();
        assert_eq!(info.output_tokens, 20);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].finish, Some(StopReason::EndTurn));
        assert!(!dir.path().join("ses_1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_todos_survive_reopen_but_not_delete() {
        let dir = tempfile::tempdir().unwrap();
        let todo: TodoItem = serde_json::from_value(serde_json::json!({
            "id": "1", "content": "Ship", "status": "in_progress", "priority": "low"
        }))
        .unwrap();
        {
            let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
            store.create(NewSession::with_id("ses_1")).await.unwrap();
            store.save_todos("ses_1", vec![todo.clone()]).await.unwrap();
        }

        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load_todos("ses_1").await.unwrap(), vec![todo]);

        store.delete("ses_1").await.unwrap();
        store.create(NewSession::with_id("ses_1")).await.unwrap();
        assert!(store.load_todos("ses_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
        store.create(NewSession::with_id("a")).await.unwrap();
        store.create(NewSession::with_id("b")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.list(None, None).await.unwrap().len(), 2);
        store.delete("a").await.unwrap();
        assert_eq!(store.list(None, None).await.unwrap().len(), 1);
        assert!(matches!(store.delete("a").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::open(dir.path()).await.unwrap();
        assert!(store.create(NewSession::with_id("../escape")).await.is_err());
        assert!(store.load("../escape").await.unwrap().0.is_none());
        store.create(NewSession::with_id("x")).await.unwrap();
        assert!(matches!(
            store.create(NewSession::with_id("x")).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
