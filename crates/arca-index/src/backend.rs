use crate::document::{DocType, IndexDocument};
use crate::error::IndexResult;
use crate::query::{Filter, IndexPage, Query, Sublist};

/// Write and query boundary of the search index engine.
///
/// Writes are staged: `upsert`, `delete` and `delete_by_filter` become
/// visible to queries only after `commit`.
pub trait IndexBackend: Send + Sync {
    fn upsert(&self, doc: IndexDocument) -> IndexResult<()>;

    fn delete(&self, doc_type: DocType, id: &str) -> IndexResult<()>;

    fn delete_by_filter(&self, doc_type: DocType, filter: &Filter) -> IndexResult<()>;

    fn query(&self, doc_type: DocType, query: &Query) -> IndexResult<IndexPage>;

    /// A committed document. Fails with `NotFound` if there is none.
    fn retrieve(&self, doc_type: DocType, id: &str) -> IndexResult<IndexDocument>;

    fn commit(&self) -> IndexResult<()>;

    /// Discard every staged, uncommitted write.
    fn rollback(&self) -> IndexResult<()>;

    fn optimize(&self, doc_type: DocType) -> IndexResult<()>;

    fn count(&self, doc_type: DocType, filter: &Filter) -> IndexResult<usize> {
        let query = Query::filtered(filter.clone()).page(Sublist::new(0, 0));
        Ok(self.query(doc_type, &query)?.total_count)
    }
}
