use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::debug;

use crate::backend::IndexBackend;
use crate::document::{DocType, IndexDocument};
use crate::error::{IndexError, IndexResult};
use crate::query::{evaluate, Filter, IndexPage, Query};

enum Pending {
    Upsert(IndexDocument),
    Delete(DocType, String),
    DeleteByFilter(DocType, Filter),
}

#[derive(Default)]
struct State {
    committed: HashMap<DocType, BTreeMap<String, IndexDocument>>,
    pending: Vec<Pending>,
    commits: usize,
    optimizations: HashMap<DocType, usize>,
}

/// In-memory index engine for tests and embedding.
///
/// Staged writes are applied in order on `commit`; queries only ever see
/// committed documents.
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Number of committed documents of one type.
    pub fn len(&self, doc_type: DocType) -> usize {
        self.state
            .read()
            .expect("lock poisoned")
            .committed
            .get(&doc_type)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .committed
            .values()
            .all(BTreeMap::is_empty)
    }

    /// Number of staged, uncommitted writes.
    pub fn pending_count(&self) -> usize {
        self.state.read().expect("lock poisoned").pending.len()
    }

    pub fn commit_count(&self) -> usize {
        self.state.read().expect("lock poisoned").commits
    }

    pub fn optimize_count(&self, doc_type: DocType) -> usize {
        self.state
            .read()
            .expect("lock poisoned")
            .optimizations
            .get(&doc_type)
            .copied()
            .unwrap_or(0)
    }

    /// All committed documents of one type, ordered by id.
    pub fn snapshot(&self, doc_type: DocType) -> Vec<IndexDocument> {
        self.state
            .read()
            .expect("lock poisoned")
            .committed
            .get(&doc_type)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBackend for InMemoryIndex {
    fn upsert(&self, doc: IndexDocument) -> IndexResult<()> {
        self.state
            .write()
            .expect("lock poisoned")
            .pending
            .push(Pending::Upsert(doc));
        Ok(())
    }

    fn delete(&self, doc_type: DocType, id: &str) -> IndexResult<()> {
        self.state
            .write()
            .expect("lock poisoned")
            .pending
            .push(Pending::Delete(doc_type, id.to_string()));
        Ok(())
    }

    fn delete_by_filter(&self, doc_type: DocType, filter: &Filter) -> IndexResult<()> {
        self.state
            .write()
            .expect("lock poisoned")
            .pending
            .push(Pending::DeleteByFilter(doc_type, filter.clone()));
        Ok(())
    }

    fn query(&self, doc_type: DocType, query: &Query) -> IndexResult<IndexPage> {
        let state = self.state.read().expect("lock poisoned");
        Ok(match state.committed.get(&doc_type) {
            Some(docs) => evaluate(docs.values(), query),
            None => evaluate(std::iter::empty(), query),
        })
    }

    fn retrieve(&self, doc_type: DocType, id: &str) -> IndexResult<IndexDocument> {
        self.state
            .read()
            .expect("lock poisoned")
            .committed
            .get(&doc_type)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("{doc_type} {id}")))
    }

    fn commit(&self) -> IndexResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let pending = std::mem::take(&mut state.pending);
        let applied = pending.len();
        for op in pending {
            match op {
                Pending::Upsert(doc) => {
                    state
                        .committed
                        .entry(doc.doc_type)
                        .or_default()
                        .insert(doc.id.clone(), doc);
                }
                Pending::Delete(doc_type, id) => {
                    if let Some(docs) = state.committed.get_mut(&doc_type) {
                        docs.remove(&id);
                    }
                }
                Pending::DeleteByFilter(doc_type, filter) => {
                    if let Some(docs) = state.committed.get_mut(&doc_type) {
                        docs.retain(|_, doc| !filter.matches(doc));
                    }
                }
            }
        }
        state.commits += 1;
        debug!(applied, "index commit");
        Ok(())
    }

    fn rollback(&self) -> IndexResult<()> {
        let discarded = std::mem::take(&mut self.state.write().expect("lock poisoned").pending);
        debug!(discarded = discarded.len(), "index rollback");
        Ok(())
    }

    fn optimize(&self, doc_type: DocType) -> IndexResult<()> {
        *self
            .state
            .write()
            .expect("lock poisoned")
            .optimizations
            .entry(doc_type)
            .or_default() += 1;
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex")
            .field("pending", &self.pending_count())
            .field("commits", &self.commit_count())
            .finish()
    }
}
