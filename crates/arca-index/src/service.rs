use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use arca_model::{ModelError, ModelReader};
use arca_store::{CloseableIter, StoragePath, StoreError};
use arca_types::{Job, LogEntry, Package, PackageId, Report};

use crate::backend::IndexBackend;
use crate::document::{fields, timestamp, DocType, IndexDocument};
use crate::error::{IndexError, IndexResult};
use crate::observer::IndexModelObserver;
use crate::projection::Projector;
use crate::query::{Filter, IndexPage, Query};

/// Index synchronizer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Apply incremental updates on a background worker instead of inline.
    pub queued: bool,
    /// Optimize package collections after a complete rebuild.
    pub optimize_after_rebuild: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            queued: false,
            optimize_after_rebuild: true,
        }
    }
}

/// Outcome of a full rebuild.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub indexed: usize,
    /// Packages whose canonical record could not be read; skipped.
    pub failed: usize,
    pub cancelled: bool,
}

/// Query and maintenance front of the search index.
pub struct IndexService {
    observer: Arc<IndexModelObserver>,
    projector: Projector,
    backend: Arc<dyn IndexBackend>,
    config: IndexConfig,
}

impl IndexService {
    pub fn new(reader: ModelReader, backend: Arc<dyn IndexBackend>, config: IndexConfig) -> Self {
        Self {
            observer: Arc::new(IndexModelObserver::new(reader.clone(), backend.clone())),
            projector: Projector::new(reader),
            backend,
            config,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    /// Inline observer to register with the model service. Wrap it in a
    /// [`QueuedObserver`](crate::queued::QueuedObserver) when
    /// [`IndexConfig::queued`] is set.
    pub fn model_observer(&self) -> Arc<IndexModelObserver> {
        self.observer.clone()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn find(&self, doc_type: DocType, query: &Query) -> IndexResult<IndexPage> {
        self.backend.query(doc_type, query)
    }

    pub fn count(&self, doc_type: DocType, filter: &Filter) -> IndexResult<usize> {
        self.backend.count(doc_type, filter)
    }

    pub fn retrieve(&self, doc_type: DocType, id: &str) -> IndexResult<IndexDocument> {
        self.backend.retrieve(doc_type, id)
    }

    /// The indexed parent of a package document; `None` for a root.
    pub fn get_parent(&self, package: &IndexDocument) -> IndexResult<Option<IndexDocument>> {
        match package.get_str(fields::PARENT_ID) {
            Some(parent) => self.backend.retrieve(DocType::Package, parent).map(Some),
            None => Ok(None),
        }
    }

    /// Indexed ancestors of a package document, nearest first.
    ///
    /// A parent that is not indexed is logged and appears as `None`; the walk
    /// stops there, and also stops before revisiting a package.
    pub fn get_ancestors(&self, package: &IndexDocument) -> IndexResult<Vec<Option<IndexDocument>>> {
        let mut ancestors = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([package.id.clone()]);
        let mut next = package.get_str(fields::PARENT_ID).map(str::to_string);

        while let Some(parent) = next.take() {
            if !seen.insert(parent.clone()) {
                warn!(package = %package.id, cycle_at = %parent, "ancestor chain has a cycle; truncated");
                break;
            }
            match self.backend.retrieve(DocType::Package, &parent) {
                Ok(doc) => {
                    next = doc.get_str(fields::PARENT_ID).map(str::to_string);
                    ancestors.push(Some(doc));
                }
                Err(IndexError::NotFound(_)) => {
                    warn!(package = %package.id, ancestor = %parent, "ancestor not indexed; substituting null");
                    ancestors.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ancestors)
    }

    // -----------------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------------

    /// Re-project every package from canonical storage.
    ///
    /// Setting `cancel` stops the rebuild after the current package; work
    /// done so far is committed. The package listing is released on every
    /// exit path.
    pub fn reindex_packages(&self, cancel: &AtomicBool) -> IndexResult<RebuildSummary> {
        info!("package reindex started");
        let mut packages = self.projector.reader().list_packages()?;
        let outcome = self.rebuild_from(&mut packages, cancel);
        packages.close();

        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) => {
                self.backend.rollback()?;
                return Err(e);
            }
        };
        self.backend.commit()?;
        if self.config.optimize_after_rebuild && !summary.cancelled {
            self.optimize_packages()?;
        }
        info!(
            indexed = summary.indexed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "package reindex finished"
        );
        Ok(summary)
    }

    fn rebuild_from(
        &self,
        packages: &mut CloseableIter<Package, ModelError>,
        cancel: &AtomicBool,
    ) -> IndexResult<RebuildSummary> {
        let mut summary = RebuildSummary::default();
        loop {
            if cancel.load(Ordering::SeqCst) {
                warn!(indexed = summary.indexed, "package reindex cancelled; index is stale");
                summary.cancelled = true;
                break;
            }
            let Some(item) = packages.next() else { break };
            match item {
                Ok(package) => {
                    self.observer.reproject_package(&package)?;
                    summary.indexed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "skipping unreadable package");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    pub fn reindex_package(&self, id: &PackageId) -> IndexResult<()> {
        let package = self.projector.reader().retrieve_package(id)?;
        self.observer.reproject_package(&package)?;
        self.backend.commit()?;
        debug!(package = %id, "package reindexed");
        Ok(())
    }

    pub fn reindex_job(&self, job: &Job) -> IndexResult<()> {
        self.backend.upsert(self.projector.job_document(job))?;
        self.backend.commit()
    }

    /// Replace the indexed items of one job report.
    pub fn reindex_job_report(&self, report: &Report) -> IndexResult<()> {
        self.backend.delete_by_filter(
            DocType::JobReport,
            &Filter::all().equals(fields::JOB_ID, report.job_id.as_str()),
        )?;
        for doc in self.projector.report_documents(report) {
            self.backend.upsert(doc)?;
        }
        self.backend.commit()
    }

    /// Replay the persisted action log into the index.
    ///
    /// Each line holds one JSON record. Blank lines are ignored; lines that
    /// are not valid UTF-8 or not a valid record are logged and skipped.
    /// Returns the number of entries indexed.
    pub fn reindex_action_logs(&self) -> IndexResult<usize> {
        let mut files = self.projector.reader().list_action_log_files()?;
        let outcome = self.replay_action_logs(&mut files);
        files.close();

        let indexed = match outcome {
            Ok(indexed) => indexed,
            Err(e) => {
                self.backend.rollback()?;
                return Err(e);
            }
        };
        self.backend.commit()?;
        info!(indexed, "action log reindexed");
        Ok(indexed)
    }

    fn replay_action_logs(
        &self,
        files: &mut CloseableIter<StoragePath, ModelError>,
    ) -> IndexResult<usize> {
        let storage = self.projector.reader().storage();
        let mut indexed = 0;
        for path in files.by_ref() {
            let path = path?;
            let payload = storage.get_payload(&path)?;
            for (n, line) in BufReader::new(payload.content).split(b'\n').enumerate() {
                let line = line.map_err(StoreError::from)?;
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<LogEntry>(&line) {
                    Ok(entry) => {
                        self.backend.upsert(self.projector.log_document(&entry))?;
                        indexed += 1;
                    }
                    Err(e) => {
                        warn!(file = %path, line = n + 1, error = %e, "skipping malformed action log line");
                    }
                }
            }
        }
        Ok(indexed)
    }

    pub fn delete_all_action_log(&self) -> IndexResult<()> {
        self.clear_index(DocType::ActionLog)
    }

    /// Drop indexed action-log entries dated at or before `until`.
    pub fn delete_action_log(&self, until: DateTime<Utc>) -> IndexResult<()> {
        self.backend.delete_by_filter(
            DocType::ActionLog,
            &Filter::all().range(fields::DATETIME, None, Some(timestamp(&until))),
        )?;
        self.backend.commit()
    }

    /// Delete every document of one type and commit.
    pub fn clear_index(&self, doc_type: DocType) -> IndexResult<()> {
        self.backend.delete_by_filter(doc_type, &Filter::all())?;
        self.backend.commit()?;
        info!(collection = %doc_type, "index cleared");
        Ok(())
    }

    /// Optimize every collection derived from packages.
    pub fn optimize_packages(&self) -> IndexResult<()> {
        for doc_type in [
            DocType::Package,
            DocType::Representation,
            DocType::File,
            DocType::PreservationEvent,
        ] {
            self.backend.optimize(doc_type)?;
        }
        Ok(())
    }

    pub fn optimize_index(&self, doc_type: DocType) -> IndexResult<()> {
        self.backend.optimize(doc_type)
    }
}

impl std::fmt::Debug for IndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
