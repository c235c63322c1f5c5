use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tessera_core::Fragment;

use crate::notify::{Notifier, StoreEvent};
use crate::traits::{foreign_fragment, written_by, DocumentRecord, DocumentStore};

/// In-memory storage backend.
///
/// All data is stored in `BTreeMap`s; nothing touches disk.
/// Ideal for testing and prototyping.
///
/// # Example
///
/// ```
/// use tessera_store::{DocumentRecord, DocumentStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.add_document(&DocumentRecord::new("doc", "aaaaaaaaaaaaaaaa")).unwrap();
/// assert_eq!(store.list_documents().unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    notifier: Notifier,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: BTreeMap<String, DocumentRecord>,
    /// document id -> timestamp -> fragment
    fragments: BTreeMap<String, BTreeMap<String, Fragment>>,
}

/// Error type for the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Fragments were written for a document that was never created.
    #[error("unknown document {0:?}")]
    UnknownDocument(String),
    /// A fragment in the batch names a different document.
    #[error("fragment for document {found:?} offered to document {expected:?}")]
    ForeignFragment {
        /// The document being written.
        expected: String,
        /// The document named by the fragment.
        found: String,
    },
    /// A thread panicked while holding the store lock.
    #[error("memory store lock poisoned")]
    LockPoisoned,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of fragments across all documents.
    pub fn total_fragment_count(&self) -> usize {
        self.lock()
            .map(|s| s.fragments.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, MemoryError> {
        self.state.lock().map_err(|_| MemoryError::LockPoisoned)
    }
}

impl DocumentStore for MemoryStore {
    type Error = MemoryError;

    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, Self::Error> {
        Ok(self.lock()?.documents.get(id).cloned())
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>, Self::Error> {
        Ok(self.lock()?.documents.values().cloned().collect())
    }

    fn add_document(&self, document: &DocumentRecord) -> Result<bool, Self::Error> {
        {
            let mut state = self.lock()?;
            if state.documents.contains_key(&document.id) {
                return Ok(false);
            }
            state
                .documents
                .insert(document.id.clone(), document.clone());
            state.fragments.entry(document.id.clone()).or_default();
        }
        self.notifier.emit(&StoreEvent::DocumentAdded {
            document_id: document.id.clone(),
        });
        Ok(true)
    }

    fn set_metadata(&self, id: &str, metadata: &Value) -> Result<bool, Self::Error> {
        {
            let mut state = self.lock()?;
            match state.documents.get_mut(id) {
                Some(document) => document.metadata = metadata.clone(),
                None => return Ok(false),
            }
        }
        self.notifier.emit(&StoreEvent::MetadataChanged {
            document_id: id.to_string(),
        });
        Ok(true)
    }

    fn add_fragments(&self, id: &str, fragments: &[Fragment]) -> Result<usize, Self::Error> {
        if let Some(foreign) = foreign_fragment(id, fragments) {
            return Err(MemoryError::ForeignFragment {
                expected: id.to_string(),
                found: foreign.document_id.clone(),
            });
        }
        let added = {
            let mut state = self.lock()?;
            let log = state
                .fragments
                .get_mut(id)
                .ok_or_else(|| MemoryError::UnknownDocument(id.to_string()))?;
            let mut added = 0;
            for fragment in fragments {
                if !log.contains_key(&fragment.timestamp) {
                    log.insert(fragment.timestamp.clone(), fragment.clone());
                    added += 1;
                }
            }
            added
        };
        if added > 0 {
            self.notifier.emit(&StoreEvent::FragmentsAdded {
                document_id: id.to_string(),
                count: added,
            });
        }
        Ok(added)
    }

    fn fragments_since(
        &self,
        id: &str,
        since: &str,
        exclude_node: Option<&str>,
    ) -> Result<Vec<Fragment>, Self::Error> {
        use std::ops::Bound::{Excluded, Unbounded};

        let state = self.lock()?;
        let Some(log) = state.fragments.get(id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .range::<str, _>((Excluded(since), Unbounded))
            .filter(|(ts, _)| exclude_node.map_or(true, |node| !written_by(ts, node)))
            .map(|(_, f)| f.clone())
            .collect())
    }

    fn fragments_at(&self, id: &str, timestamps: &[String]) -> Result<Vec<Fragment>, Self::Error> {
        let state = self.lock()?;
        let Some(log) = state.fragments.get(id) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<Fragment> = timestamps
            .iter()
            .filter_map(|ts| log.get(ts).cloned())
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        found.dedup_by(|a, b| a.timestamp == b.timestamp);
        Ok(found)
    }

    fn for_each_fragment(
        &self,
        id: &str,
        visit: &mut dyn FnMut(Fragment),
    ) -> Result<(), Self::Error> {
        let snapshot: Vec<Fragment> = match self.lock()?.fragments.get(id) {
            Some(log) => log.values().cloned().collect(),
            None => return Ok(()),
        };
        for fragment in snapshot {
            visit(fragment);
        }
        Ok(())
    }

    fn fragment_count(&self, id: &str) -> Result<u64, Self::Error> {
        Ok(self
            .lock()?
            .fragments
            .get(id)
            .map_or(0, |log| log.len() as u64))
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(ts: &str) -> Fragment {
        Fragment {
            document_id: "doc".into(),
            timestamp: ts.into(),
            table: "t".into(),
            row: "r".into(),
            column: "c".into(),
            value: json!(ts),
        }
    }

    #[test]
    fn fragments_need_a_document() {
        let store = MemoryStore::new();
        let err = store.add_fragments("doc", &[fragment("1")]).unwrap_err();
        assert_eq!(err, MemoryError::UnknownDocument("doc".into()));
        assert_eq!(store.total_fragment_count(), 0);
    }

    #[test]
    fn duplicate_fragments_are_ignored() {
        let store = MemoryStore::new();
        store.add_document(&DocumentRecord::new("doc", "n")).unwrap();
        assert_eq!(store.add_fragments("doc", &[fragment("1"), fragment("2")]).unwrap(), 2);
        assert_eq!(store.add_fragments("doc", &[fragment("2"), fragment("3")]).unwrap(), 1);
        assert_eq!(store.fragment_count("doc").unwrap(), 3);
    }

    #[test]
    fn documents_are_created_once() {
        let store = MemoryStore::new();
        let doc = DocumentRecord::new("doc", "n").with_metadata(json!({"name": "a"}));
        assert!(store.add_document(&doc).unwrap());
        assert!(!store.add_document(&DocumentRecord::new("doc", "other")).unwrap());
        assert_eq!(store.get_document("doc").unwrap(), Some(doc));
    }
}
