use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tessera_core::ids::new_id;
use tessera_store::{DocumentRecord, DocumentStore};
use tokio::sync::RwLock;
use tokio::task;
use tracing::info;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{DocumentSession, SessionResult};

/// One store plus the sessions currently open on it.
///
/// Opening the same document twice hands out the same actor, so every write
/// to a document on this replica goes through one mailbox.
pub struct Replica<S: DocumentStore> {
    store: Arc<S>,
    config: SessionConfig,
    sessions: RwLock<HashMap<String, DocumentSession<S>>>,
}

impl<S: DocumentStore> Replica<S> {
    /// Wrap a store.
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    /// Wrap a store that is shared elsewhere.
    pub fn from_arc(store: Arc<S>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a document with a fresh id and node id, and open it.
    pub async fn create_document(&self, metadata: Value) -> SessionResult<DocumentSession<S>, S> {
        let record = DocumentRecord::new(new_id(), new_id()).with_metadata(metadata);
        let id = record.id.clone();
        self.add_document(record).await?;
        info!(document = %id, "created document");
        self.open_document(&id).await
    }

    /// Open a stored document, or hand out its running session.
    pub async fn open_document(&self, id: &str) -> SessionResult<DocumentSession<S>, S> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id).filter(|s| !s.is_closed()) {
                return Ok(session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id).filter(|s| !s.is_closed()) {
            return Ok(session.clone());
        }
        let session = DocumentSession::open(Arc::clone(&self.store), id, &self.config).await?;
        sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Open `id`, creating it with a fresh node id first if this replica has
    /// never seen it. `metadata` only applies to a new document.
    pub async fn open_or_create_document(
        &self,
        id: &str,
        metadata: Value,
    ) -> SessionResult<DocumentSession<S>, S> {
        let record = DocumentRecord::new(id, new_id()).with_metadata(metadata);
        if self.add_document(record).await? {
            info!(document = %id, "created document");
        }
        self.open_document(id).await
    }

    /// Every stored document, open or not.
    pub async fn documents(&self) -> SessionResult<Vec<DocumentRecord>, S> {
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.list_documents())
            .await?
            .map_err(SessionError::Store)
    }

    /// Close every open session.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            // Already closed is fine.
            let _ = session.close().await;
        }
    }

    async fn add_document(&self, record: DocumentRecord) -> SessionResult<bool, S> {
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.add_document(&record))
            .await?
            .map_err(SessionError::Store)
    }
}
