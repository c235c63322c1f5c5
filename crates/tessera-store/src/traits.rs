use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::Fragment;

use crate::notify::{Notifier, StoreCallback, SubscriptionId};

/// Identity of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    /// Document id.
    pub id: String,
    /// Node id this replica stamps onto the document's writes. Stable for the
    /// lifetime of the document on this replica.
    pub node_id: String,
    /// Free-form application metadata.
    pub metadata: Value,
}

impl DocumentRecord {
    /// A record with empty (`{}`) metadata.
    pub fn new(id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            metadata: Value::Object(Default::default()),
        }
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persistence collaborator for documents and their fragment logs.
///
/// Every method is a self-contained transaction. Calls block; async callers
/// should run them on a blocking pool. Implementations must be shareable
/// across threads since every open document session holds a handle.
///
/// Fragments are keyed by `(document id, timestamp)`: storing a fragment whose
/// timestamp is already present is a no-op, which makes redelivery harmless.
pub trait DocumentStore: Send + Sync + 'static {
    /// Error type for this backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a document.
    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, Self::Error>;

    /// Every document, ordered by id.
    fn list_documents(&self) -> Result<Vec<DocumentRecord>, Self::Error>;

    /// Create a document. Returns `false` if a document with that id exists;
    /// the stored record is left untouched in that case.
    fn add_document(&self, document: &DocumentRecord) -> Result<bool, Self::Error>;

    /// Replace a document's metadata. Returns `false` for an unknown id.
    fn set_metadata(&self, id: &str, metadata: &Value) -> Result<bool, Self::Error>;

    /// Store fragments under document `id` atomically: either all of them are
    /// durable afterwards or none are. Returns how many were new.
    ///
    /// Every fragment must name `id` as its document; a batch containing any
    /// other document id is rejected whole.
    fn add_fragments(&self, id: &str, fragments: &[Fragment]) -> Result<usize, Self::Error>;

    /// Fragments with a timestamp strictly greater than `since`, in timestamp
    /// order, optionally skipping those written by `exclude_node`.
    fn fragments_since(
        &self,
        id: &str,
        since: &str,
        exclude_node: Option<&str>,
    ) -> Result<Vec<Fragment>, Self::Error>;

    /// Fragments at exactly the given timestamps, in timestamp order. Unknown
    /// timestamps are skipped.
    fn fragments_at(&self, id: &str, timestamps: &[String]) -> Result<Vec<Fragment>, Self::Error>;

    /// Visit every fragment of a document in timestamp order.
    fn for_each_fragment(
        &self,
        id: &str,
        visit: &mut dyn FnMut(Fragment),
    ) -> Result<(), Self::Error>;

    /// Number of stored fragments for a document.
    fn fragment_count(&self, id: &str) -> Result<u64, Self::Error>;

    /// The backend's change notification registry.
    fn notifier(&self) -> &Notifier;

    /// Follow every committed change to one document.
    fn subscribe_document(&self, id: &str, callback: StoreCallback) -> SubscriptionId {
        self.notifier().subscribe_document(id, callback)
    }

    /// Follow document creation and metadata changes.
    fn subscribe_documents(&self, callback: StoreCallback) -> SubscriptionId {
        self.notifier().subscribe_documents(callback)
    }

    /// Drop a subscription made through this store.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.notifier().unsubscribe(subscription)
    }
}

/// The first fragment in `fragments` that does not belong to document `id`.
pub(crate) fn foreign_fragment<'a>(id: &str, fragments: &'a [Fragment]) -> Option<&'a Fragment> {
    fragments.iter().find(|f| f.document_id != id)
}

/// Whether a serialized timestamp was written by `node`.
pub(crate) fn written_by(timestamp: &str, node: &str) -> bool {
    timestamp.ends_with(node)
}
