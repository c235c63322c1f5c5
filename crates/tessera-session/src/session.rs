//! The per-document actor.
//!
//! A [`DocumentSession`] is a cheap handle onto a task that owns the
//! document's clock, Merkle index and projection. Every mutating call is a
//! command in the task's mailbox and commands run strictly one after another,
//! so no two writes ever interleave their read-modify-write of that state.
//!
//! Each command works on scratch copies. Its fragments are flushed to the
//! store in one atomic call on the blocking pool, and only once that flush
//! succeeds are the scratch copies committed and the projection updated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tessera_core::ids::new_id;
use tessera_core::{
    handle_all, prepare_sync, ClockError, Digest, Fragment, HybridClock, MerkleTree, Projection,
    Timestamp,
};
use tessera_store::{DocumentRecord, DocumentStore};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::packet::SyncPacket;

/// Result type of session operations over store `S`.
pub type SessionResult<T, S> = Result<T, SessionError<<S as DocumentStore>::Error>>;

/// Snapshot of an open document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    /// Document id.
    pub id: String,
    /// Node id stamped onto this replica's writes.
    pub node_id: String,
    /// Application metadata.
    pub metadata: Value,
    /// The merged `table -> row -> column -> value` view.
    pub data: Projection,
}

/// Where a batch of applied fragments came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written through this session.
    Local,
    /// Received from a peer during sync.
    Remote,
}

/// One committed batch, delivered to every [`subscribe`](DocumentSession::subscribe)r.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentsApplied {
    /// Document the batch belongs to.
    pub document_id: String,
    /// Local write or remote merge.
    pub origin: Origin,
    /// The durable fragments, in timestamp order.
    pub fragments: Vec<Fragment>,
}

/// Sync-level summary of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Root digest of the Merkle index, `None` when empty.
    pub key: Option<Digest>,
    /// Timestamps recorded in the index.
    pub fragments: usize,
    /// The clock's last timestamp.
    pub clock: Timestamp,
}

enum Command<S: DocumentStore> {
    Insert {
        table: String,
        values: Map<String, Value>,
        reply: oneshot::Sender<SessionResult<String, S>>,
    },
    Update {
        table: String,
        row: String,
        values: Map<String, Value>,
        reply: oneshot::Sender<SessionResult<(), S>>,
    },
    PrepareSync {
        reply: oneshot::Sender<SyncPacket>,
    },
    HandleSync {
        packet: SyncPacket,
        reply: oneshot::Sender<SessionResult<SyncPacket, S>>,
    },
    State {
        reply: oneshot::Sender<DocumentState>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    SetMetadata {
        metadata: Value,
        reply: oneshot::Sender<SessionResult<(), S>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one open document. Clones share the same actor.
pub struct DocumentSession<S: DocumentStore> {
    id: String,
    node_id: String,
    commands: mpsc::Sender<Command<S>>,
    events: broadcast::Sender<FragmentsApplied>,
}

impl<S: DocumentStore> Clone for DocumentSession<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            node_id: self.node_id.clone(),
            commands: self.commands.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: DocumentStore> fmt::Debug for DocumentSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S: DocumentStore> DocumentSession<S> {
    /// Open an existing document: replay its fragment log, rebuild the index
    /// and projection, and start the actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(store: Arc<S>, id: &str, config: &SessionConfig) -> SessionResult<Self, S> {
        let loaded = {
            let store = Arc::clone(&store);
            let id = id.to_string();
            task::spawn_blocking(move || load(&*store, &id)).await?
        }
        .map_err(SessionError::Store)?;
        let Some((document, fragments)) = loaded else {
            return Err(SessionError::DocumentNotFound(id.to_string()));
        };

        let ts_config = config.clock.timestamp;
        let timestamps = fragments
            .iter()
            .map(|f| f.parse_timestamp(&ts_config))
            .collect::<Result<Vec<_>, _>>()?;

        let tree = MerkleTree::build(ts_config, &timestamps);
        let mut projection = Projection::new();
        projection.apply_all(&fragments);

        let mut clock = HybridClock::with_time_source(
            document.node_id.clone(),
            config.clock,
            Arc::clone(&config.time_source),
        )?;
        if let Some(latest) = timestamps.iter().max() {
            clock.restore(latest)?;
        }

        info!(
            document = %document.id,
            node = %document.node_id,
            fragments = fragments.len(),
            "opened document session"
        );

        let (commands, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let session = Self {
            id: document.id.clone(),
            node_id: document.node_id.clone(),
            commands,
            events: events.clone(),
        };
        let actor = Actor {
            store,
            document,
            clock,
            tree,
            projection,
            events,
        };
        tokio::spawn(actor.run(mailbox));
        Ok(session)
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Node id stamped onto this replica's writes.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Write a new row with a generated id. Every column becomes its own
    /// fragment. Returns the row id.
    pub async fn insert(
        &self,
        table: impl Into<String>,
        values: Map<String, Value>,
    ) -> SessionResult<String, S> {
        let table = table.into();
        self.call(|reply| Command::Insert {
            table,
            values,
            reply,
        })
        .await?
    }

    /// Overwrite some columns of a row.
    pub async fn update(
        &self,
        table: impl Into<String>,
        row: impl Into<String>,
        values: Map<String, Value>,
    ) -> SessionResult<(), S> {
        let (table, row) = (table.into(), row.into());
        self.call(|reply| Command::Update {
            table,
            row,
            values,
            reply,
        })
        .await?
    }

    /// The opening packet of a sync exchange.
    pub async fn prepare_sync(&self) -> SessionResult<SyncPacket, S> {
        self.call(|reply| Command::PrepareSync { reply }).await
    }

    /// Apply a packet from a peer and compute the answer.
    ///
    /// The packet's fragments are merged first, then its messages are
    /// answered. A malformed fragment rejects the whole packet. A fragment
    /// from too far in the future is skipped with a warning. A
    /// [`SessionError::Sync`] error leaves the document untouched; restart
    /// the exchange from [`prepare_sync`](Self::prepare_sync).
    pub async fn handle_sync(&self, packet: SyncPacket) -> SessionResult<SyncPacket, S> {
        self.call(|reply| Command::HandleSync { packet, reply })
            .await?
    }

    /// Snapshot of the document.
    pub async fn get_state(&self) -> SessionResult<DocumentState, S> {
        self.call(|reply| Command::State { reply }).await
    }

    /// Index digest, size and clock position.
    pub async fn status(&self) -> SessionResult<SessionStatus, S> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Replace the document's metadata.
    pub async fn set_metadata(&self, metadata: Value) -> SessionResult<(), S> {
        self.call(|reply| Command::SetMetadata { metadata, reply })
            .await?
    }

    /// Follow every committed batch of fragments.
    pub fn subscribe(&self) -> broadcast::Receiver<FragmentsApplied> {
        self.events.subscribe()
    }

    /// Stop the actor once the commands queued before this one have run.
    /// Later calls on any handle fail with [`SessionError::Closed`].
    pub async fn close(&self) -> SessionResult<(), S> {
        self.call(|reply| Command::Close { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command<S>,
    ) -> SessionResult<T, S> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        answer.await.map_err(|_| SessionError::Closed)
    }
}

type Loaded = Option<(DocumentRecord, Vec<Fragment>)>;

fn load<S: DocumentStore>(store: &S, id: &str) -> Result<Loaded, S::Error> {
    let Some(document) = store.get_document(id)? else {
        return Ok(None);
    };
    let mut fragments = Vec::new();
    store.for_each_fragment(id, &mut |f| fragments.push(f))?;
    Ok(Some((document, fragments)))
}

struct Actor<S: DocumentStore> {
    store: Arc<S>,
    document: DocumentRecord,
    clock: HybridClock,
    tree: MerkleTree,
    projection: Projection,
    events: broadcast::Sender<FragmentsApplied>,
}

impl<S: DocumentStore> Actor<S> {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command<S>>) {
        while let Some(command) = mailbox.recv().await {
            // A dropped reply only means the caller stopped waiting.
            match command {
                Command::Insert {
                    table,
                    values,
                    reply,
                } => {
                    let row = new_id();
                    let result = self.write(table, row.clone(), values).await.map(|_| row);
                    let _ = reply.send(result);
                }
                Command::Update {
                    table,
                    row,
                    values,
                    reply,
                } => {
                    let _ = reply.send(self.write(table, row, values).await);
                }
                Command::PrepareSync { reply } => {
                    let _ = reply.send(SyncPacket::message(prepare_sync(&self.tree)));
                }
                Command::HandleSync { packet, reply } => {
                    let _ = reply.send(self.handle_sync(packet).await);
                }
                Command::State { reply } => {
                    let _ = reply.send(self.state());
                }
                Command::Status { reply } => {
                    let _ = reply.send(SessionStatus {
                        key: self.tree.key(),
                        fragments: self.tree.len(),
                        clock: self.clock.current().clone(),
                    });
                }
                Command::SetMetadata { metadata, reply } => {
                    let _ = reply.send(self.set_metadata(metadata).await);
                }
                Command::Close { reply } => {
                    mailbox.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!(document = %self.document.id, "document session stopped");
    }

    fn state(&self) -> DocumentState {
        DocumentState {
            id: self.document.id.clone(),
            node_id: self.document.node_id.clone(),
            metadata: self.document.metadata.clone(),
            data: self.projection.clone(),
        }
    }

    async fn write(
        &mut self,
        table: String,
        row: String,
        values: Map<String, Value>,
    ) -> SessionResult<(), S> {
        if values.is_empty() {
            return Ok(());
        }

        let mut clock = self.clock.clone();
        let mut stamps = Vec::with_capacity(values.len());
        let mut fragments = Vec::with_capacity(values.len());
        for (column, value) in values {
            let ts = clock.send()?;
            fragments.push(Fragment::new(
                self.document.id.as_str(),
                &ts,
                table.as_str(),
                row.as_str(),
                column,
                value,
            ));
            stamps.push(ts);
        }
        let (tree, _) = self.tree.handle_items(&stamps);

        let fragments = self.persist(fragments).await?;
        self.clock = clock;
        self.tree = tree;
        self.projection.apply_all(&fragments);
        self.publish(Origin::Local, fragments);
        Ok(())
    }

    async fn handle_sync(&mut self, packet: SyncPacket) -> SessionResult<SyncPacket, S> {
        let config = *self.tree.config();
        let mut incoming = BTreeMap::new();
        for fragment in packet.fragments {
            if fragment.document_id != self.document.id {
                return Err(SessionError::ForeignFragment {
                    expected: self.document.id.clone(),
                    found: fragment.document_id,
                });
            }
            let ts = fragment.parse_timestamp(&config)?;
            incoming.insert(ts, fragment);
        }

        let mut clock = self.clock.clone();
        let mut accepted = BTreeMap::new();
        for (ts, fragment) in incoming {
            if self.tree.has(&ts) {
                continue;
            }
            match clock.receive(&ts) {
                Ok(_) => {
                    accepted.insert(ts, fragment);
                }
                Err(ClockError::DriftExceeded {
                    logical,
                    wall,
                    max_drift,
                }) => {
                    warn!(
                        document = %self.document.id,
                        timestamp = %ts,
                        logical,
                        wall,
                        max_drift,
                        "rejected remote fragment beyond the drift bound"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        let stamps: Vec<Timestamp> = accepted.keys().cloned().collect();
        let (tree, _) = self.tree.handle_items(&stamps);
        let outcome = handle_all(&tree, &packet.messages)?;

        let fragments: Vec<Fragment> = accepted.into_values().collect();
        let fragments = if fragments.is_empty() {
            fragments
        } else {
            self.persist(fragments).await?
        };
        self.clock = clock;
        self.tree = tree;
        self.projection.apply_all(&fragments);
        self.publish(Origin::Remote, fragments);

        let wanted: Vec<String> = outcome
            .items
            .iter()
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let pushed = if wanted.is_empty() {
            Vec::new()
        } else {
            let store = Arc::clone(&self.store);
            let id = self.document.id.clone();
            task::spawn_blocking(move || store.fragments_at(&id, &wanted))
                .await?
                .map_err(SessionError::Store)?
        };

        Ok(SyncPacket {
            messages: outcome.responses,
            fragments: pushed,
        })
    }

    async fn set_metadata(&mut self, metadata: Value) -> SessionResult<(), S> {
        let store = Arc::clone(&self.store);
        let id = self.document.id.clone();
        let stored = {
            let metadata = metadata.clone();
            task::spawn_blocking(move || store.set_metadata(&id, &metadata)).await?
        }
        .map_err(SessionError::Store)?;
        if !stored {
            return Err(SessionError::DocumentNotFound(self.document.id.clone()));
        }
        self.document.metadata = metadata;
        Ok(())
    }

    /// Flush one batch. The fragments come back for the commit step.
    async fn persist(&self, fragments: Vec<Fragment>) -> SessionResult<Vec<Fragment>, S> {
        let store = Arc::clone(&self.store);
        let id = self.document.id.clone();
        let (result, fragments) = task::spawn_blocking(move || {
            let result = store.add_fragments(&id, &fragments);
            (result, fragments)
        })
        .await?;

        match result {
            Ok(added) => {
                debug!(
                    document = %self.document.id,
                    added,
                    batch = fragments.len(),
                    "flushed fragments"
                );
                Ok(fragments)
            }
            Err(err) => {
                warn!(document = %self.document.id, error = %err, "fragment flush failed");
                Err(SessionError::Store(err))
            }
        }
    }

    fn publish(&self, origin: Origin, fragments: Vec<Fragment>) {
        if fragments.is_empty() {
            return;
        }
        // No receivers is fine.
        let _ = self.events.send(FragmentsApplied {
            document_id: self.document.id.clone(),
            origin,
            fragments,
        });
    }
}
