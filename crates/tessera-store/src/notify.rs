//! Change notification for store consumers.
//!
//! A [`Notifier`] is a thread-safe callback registry. Backends emit a
//! [`StoreEvent`] after every committed change; subscribers either follow one
//! document or the document list as a whole.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked with each matching event.
///
/// Callbacks run on the thread that committed the change and should not
/// block.
pub type StoreCallback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new document was created.
    DocumentAdded {
        /// The new document.
        document_id: String,
    },
    /// A document's metadata was replaced.
    MetadataChanged {
        /// The changed document.
        document_id: String,
    },
    /// New fragments were stored for a document.
    FragmentsAdded {
        /// The document written to.
        document_id: String,
        /// Fragments that were new.
        count: usize,
    },
}

impl StoreEvent {
    /// The document the event is about.
    pub fn document_id(&self) -> &str {
        match self {
            StoreEvent::DocumentAdded { document_id }
            | StoreEvent::MetadataChanged { document_id }
            | StoreEvent::FragmentsAdded { document_id, .. } => document_id,
        }
    }

    /// Whether the event changes the document list (creation or metadata).
    pub fn affects_listing(&self) -> bool {
        !matches!(self, StoreEvent::FragmentsAdded { .. })
    }
}

enum Scope {
    Document(String),
    Documents,
}

struct Subscriber {
    scope: Scope,
    callback: StoreCallback,
}

/// Thread-safe registry of store subscribers.
pub struct Notifier {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl Notifier {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Follow every change to one document.
    pub fn subscribe_document(
        &self,
        document_id: impl Into<String>,
        callback: StoreCallback,
    ) -> SubscriptionId {
        self.insert(Scope::Document(document_id.into()), callback)
    }

    /// Follow changes to the document list.
    pub fn subscribe_documents(&self, callback: StoreCallback) -> SubscriptionId {
        self.insert(Scope::Documents, callback)
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// A panicking callback does not prevent delivery to the others.
    pub fn emit(&self, event: &StoreEvent) {
        let matching: Vec<StoreCallback> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers
                .values()
                .filter(|s| match &s.scope {
                    Scope::Document(id) => id == event.document_id(),
                    Scope::Documents => event.affects_listing(),
                })
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        for callback in matching {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn insert(&self, scope: Scope, callback: StoreCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscriber { scope, callback });
        id
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
