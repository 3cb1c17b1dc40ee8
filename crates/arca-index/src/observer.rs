use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use arca_model::{ModelError, ModelObserver, ModelReader, ObserverResult};
use arca_types::{
    DescriptiveMetadata, ErrorKind, File, Job, LogEntry, Package, PackageId, PreservationEvent,
    RelativePath, Report, Representation, RepresentationId,
};

use crate::backend::IndexBackend;
use crate::document::{fields, DocType};
use crate::error::IndexResult;
use crate::projection::{file_doc_id, representation_doc_id, Projector};
use crate::query::{Filter, Query, Sublist};

/// Keeps the index in step with canonical storage, one event at a time.
///
/// Every callback stages its writes and commits before returning. A
/// callback that fails discards what it staged, so a half-applied event is
/// never published by a later commit.
pub struct IndexModelObserver {
    projector: Projector,
    backend: Arc<dyn IndexBackend>,
}

impl IndexModelObserver {
    pub fn new(reader: ModelReader, backend: Arc<dyn IndexBackend>) -> Self {
        Self {
            projector: Projector::new(reader),
            backend,
        }
    }

    /// Re-project the package record (counts, metadata, lineage).
    fn refresh_package(&self, id: &PackageId) -> IndexResult<()> {
        let package = self.projector.reader().package_record(id)?;
        let lineage = self.projector.lineage(&package);
        self.backend
            .upsert(self.projector.package_document(&package, &lineage))
    }

    fn refresh_representation(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> IndexResult<()> {
        let reader = self.projector.reader();
        let package = reader.package_record(package_id)?;
        let representation = reader.retrieve_representation(package_id, representation_id)?;
        let files: Vec<File> = reader
            .list_all_files(package_id, representation_id)?
            .collect::<Result<_, ModelError>>()?;
        let lineage = self.projector.lineage(&package);
        self.backend.upsert(
            self.projector
                .representation_document(&representation, &files, &lineage),
        )
    }

    /// Replace every document derived from one package.
    pub(crate) fn reproject_package(&self, package: &Package) -> IndexResult<()> {
        let by_package = Filter::all().equals(fields::PACKAGE_ID, package.id.as_str());
        self.backend.delete_by_filter(DocType::Representation, &by_package)?;
        self.backend.delete_by_filter(DocType::File, &by_package)?;
        for doc in self.projector.package_documents(package)? {
            self.backend.upsert(doc)?;
        }
        Ok(())
    }

    fn package_changed(&self, package: &Package) -> IndexResult<()> {
        self.reproject_package(package)?;
        self.reproject_descendants(&package.id, &mut HashSet::new())
    }

    /// Re-project every package whose lineage runs through `id`.
    ///
    /// Descendants are found by their ancestor ids and, for children whose
    /// link to `id` was dangling until now, by their parent id.
    fn reproject_descendants(&self, id: &PackageId, seen: &mut HashSet<String>) -> IndexResult<()> {
        seen.insert(id.to_string());
        for field in [fields::ANCESTORS, fields::PARENT_ID] {
            let query = Query::filtered(Filter::all().equals(field, id.as_str())).page(Sublist::all());
            for doc in self.backend.query(DocType::Package, &query)?.results {
                if !seen.insert(doc.id.clone()) {
                    continue;
                }
                let Ok(child) = PackageId::new(doc.id.as_str()) else {
                    continue;
                };
                match self.projector.reader().retrieve_package(&child) {
                    Ok(package) => self.reproject_package(&package)?,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(package = %child, "indexed descendant no longer stored");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
                // Ancestor ids stop at a dangling link, so what lies below a
                // newly linked child is only reachable through it.
                if field == fields::PARENT_ID {
                    self.reproject_descendants(&child, seen)?;
                }
            }
        }
        Ok(())
    }

    fn apply(&self, f: impl FnOnce() -> IndexResult<()>) -> ObserverResult {
        if let Err(e) = f() {
            self.backend.rollback()?;
            return Err(e.into());
        }
        self.backend.commit()?;
        Ok(())
    }
}

impl ModelObserver for IndexModelObserver {
    fn name(&self) -> &str {
        "index"
    }

    fn package_created(&self, package: &Package) -> ObserverResult {
        self.apply(|| self.package_changed(package))
    }

    fn package_updated(&self, package: &Package) -> ObserverResult {
        self.apply(|| self.package_changed(package))
    }

    fn package_deleted(&self, id: &PackageId) -> ObserverResult {
        self.apply(|| {
            let by_package = Filter::all().equals(fields::PACKAGE_ID, id.as_str());
            self.backend.delete(DocType::Package, id.as_str())?;
            self.backend.delete_by_filter(DocType::Representation, &by_package)?;
            self.backend.delete_by_filter(DocType::File, &by_package)?;
            self.backend.delete_by_filter(DocType::PreservationEvent, &by_package)?;
            self.reproject_descendants(id, &mut HashSet::new())
        })
    }

    fn representation_created(&self, representation: &Representation) -> ObserverResult {
        self.apply(|| {
            self.refresh_representation(&representation.package_id, &representation.id)?;
            self.refresh_package(&representation.package_id)
        })
    }

    fn representation_deleted(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ObserverResult {
        self.apply(|| {
            self.backend.delete(
                DocType::Representation,
                &representation_doc_id(package_id, representation_id.as_str()),
            )?;
            let files = Filter::all()
                .equals(fields::PACKAGE_ID, package_id.as_str())
                .equals(fields::REPRESENTATION_ID, representation_id.as_str());
            self.backend.delete_by_filter(DocType::File, &files)?;
            self.refresh_package(package_id)
        })
    }

    fn file_created(&self, file: &File) -> ObserverResult {
        self.apply(|| {
            let reader = self.projector.reader();
            let package = reader.package_record(&file.package_id)?;
            let lineage = self.projector.lineage(&package);

            // Folders are created implicitly with their first file.
            let folders = &file.path.folders;
            for depth in 0..folders.len() {
                let folder = RelativePath::new(folders[..depth].to_vec(), folders[depth].clone())
                    .map_err(ModelError::from)?;
                let folder = reader.retrieve_file(&file.package_id, &file.representation_id, &folder)?;
                self.backend.upsert(self.projector.file_document(&folder, &lineage))?;
            }
            self.backend.upsert(self.projector.file_document(file, &lineage))?;
            self.refresh_representation(&file.package_id, &file.representation_id)
        })
    }

    fn file_deleted(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
        path: &RelativePath,
    ) -> ObserverResult {
        self.apply(|| {
            self.backend
                .delete(DocType::File, &file_doc_id(package_id, representation_id, path))?;
            self.refresh_representation(package_id, representation_id)
        })
    }

    fn descriptive_metadata_created(&self, metadata: &DescriptiveMetadata) -> ObserverResult {
        self.apply(|| self.refresh_package(&metadata.package_id))
    }

    fn preservation_event_created(&self, event: &PreservationEvent) -> ObserverResult {
        self.apply(|| self.backend.upsert(self.projector.event_document(event)))
    }

    fn log_entry_created(&self, entry: &LogEntry) -> ObserverResult {
        self.apply(|| self.backend.upsert(self.projector.log_document(entry)))
    }

    fn job_created_or_updated(&self, job: &Job) -> ObserverResult {
        debug!(job = %job.id, "indexing job");
        self.apply(|| self.backend.upsert(self.projector.job_document(job)))
    }

    fn job_report_created_or_updated(&self, report: &Report) -> ObserverResult {
        self.apply(|| {
            for doc in self.projector.report_documents(report) {
                self.backend.upsert(doc)?;
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for IndexModelObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexModelObserver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use arca_model::{ModelService, NewPackage};
    use arca_store::InMemoryStorage;
    use serde_json::json;

    use super::*;
    use crate::document::IndexDocument;
    use crate::error::IndexError;
    use crate::memory::InMemoryIndex;
    use crate::query::IndexPage;

    fn pid(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn rid(s: &str) -> RepresentationId {
        RepresentationId::new(s).unwrap()
    }

    fn setup() -> (ModelService, Arc<InMemoryIndex>) {
        let model = ModelService::new(Arc::new(InMemoryStorage::new()));
        let index = Arc::new(InMemoryIndex::new());
        model.register_observer(Arc::new(IndexModelObserver::new(
            model.reader().clone(),
            index.clone(),
        )));
        (model, index)
    }

    fn create(model: &ModelService, id: &str, parent: Option<&str>) {
        model
            .create_package(NewPackage {
                id: Some(pid(id)),
                parent_id: parent.map(pid),
                ..NewPackage::default()
            })
            .unwrap();
    }

    #[test]
    fn mutations_are_visible_after_each_event() {
        let (model, index) = setup();
        create(&model, "p1", None);
        assert_eq!(index.len(DocType::Package), 1);

        model.create_representation(&pid("p1"), rid("r1"), true).unwrap();
        let path = RelativePath::parse("c/d.jpg").unwrap();
        model.create_file(&pid("p1"), &rid("r1"), &path, &mut &b"jpeg"[..]).unwrap();

        let rep = index.retrieve(DocType::Representation, "p1/r1").unwrap();
        assert_eq!(rep.get_u64(fields::FILE_COUNT), Some(1));
        let pkg = index.retrieve(DocType::Package, "p1").unwrap();
        assert_eq!(pkg.get_u64(fields::REPRESENTATION_COUNT), Some(1));
        assert!(index.retrieve(DocType::File, "p1/r1/c/d.jpg").is_ok());

        model.delete_file(&pid("p1"), &rid("r1"), &path).unwrap();
        assert!(index.retrieve(DocType::File, "p1/r1/c/d.jpg").is_err());
        let rep = index.retrieve(DocType::Representation, "p1/r1").unwrap();
        assert_eq!(rep.get_u64(fields::FILE_COUNT), Some(0));
        assert_eq!(index.pending_count(), 0);
    }

    #[test]
    fn deleting_package_drops_derived_documents() {
        let (model, index) = setup();
        create(&model, "p1", None);
        model.create_representation(&pid("p1"), rid("r1"), true).unwrap();
        model
            .create_file(&pid("p1"), &rid("r1"), &RelativePath::parse("a").unwrap(), &mut &b"a"[..])
            .unwrap();

        model.delete_package(&pid("p1")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn moving_a_package_updates_descendant_lineage() {
        let (model, index) = setup();
        create(&model, "a", None);
        create(&model, "b", None);
        create(&model, "c", Some("b"));
        let c = index.retrieve(DocType::Package, "c").unwrap();
        assert_eq!(c.get(fields::ANCESTORS), Some(&json!(["b"])));

        model.move_package(&pid("b"), Some(pid("a"))).unwrap();
        let c = index.retrieve(DocType::Package, "c").unwrap();
        assert_eq!(c.get(fields::ANCESTORS), Some(&json!(["b", "a"])));
    }

    #[test]
    fn creating_a_missing_parent_links_waiting_children() {
        let (model, index) = setup();
        create(&model, "child", Some("ghost"));
        create(&model, "grandchild", Some("child"));
        let grandchild = index.retrieve(DocType::Package, "grandchild").unwrap();
        assert_eq!(grandchild.get(fields::ANCESTORS), Some(&json!(["child", null])));

        create(&model, "ghost", None);
        let child = index.retrieve(DocType::Package, "child").unwrap();
        assert_eq!(child.get(fields::ANCESTORS), Some(&json!(["ghost"])));
        let grandchild = index.retrieve(DocType::Package, "grandchild").unwrap();
        assert_eq!(grandchild.get(fields::ANCESTORS), Some(&json!(["child", "ghost"])));
    }

    #[test]
    fn deleting_a_parent_leaves_a_gap_in_descendant_lineage() {
        let (model, index) = setup();
        create(&model, "root", None);
        create(&model, "kid", Some("root"));
        create(&model, "grandkid", Some("kid"));

        model.delete_package(&pid("root")).unwrap();
        let kid = index.retrieve(DocType::Package, "kid").unwrap();
        assert_eq!(kid.get(fields::ANCESTORS), Some(&json!([null])));
        let grandkid = index.retrieve(DocType::Package, "grandkid").unwrap();
        assert_eq!(grandkid.get(fields::ANCESTORS), Some(&json!(["kid", null])));
    }

    /// Backend whose queries fail, so handlers that look up descendants
    /// fail after staging writes.
    struct BrokenQueries(InMemoryIndex);

    impl IndexBackend for BrokenQueries {
        fn upsert(&self, doc: IndexDocument) -> IndexResult<()> {
            self.0.upsert(doc)
        }
        fn delete(&self, doc_type: DocType, id: &str) -> IndexResult<()> {
            self.0.delete(doc_type, id)
        }
        fn delete_by_filter(&self, doc_type: DocType, filter: &Filter) -> IndexResult<()> {
            self.0.delete_by_filter(doc_type, filter)
        }
        fn query(&self, _doc_type: DocType, _query: &Query) -> IndexResult<IndexPage> {
            Err(IndexError::Backend("query engine down".into()))
        }
        fn retrieve(&self, doc_type: DocType, id: &str) -> IndexResult<IndexDocument> {
            self.0.retrieve(doc_type, id)
        }
        fn commit(&self) -> IndexResult<()> {
            self.0.commit()
        }
        fn rollback(&self) -> IndexResult<()> {
            self.0.rollback()
        }
        fn optimize(&self, doc_type: DocType) -> IndexResult<()> {
            self.0.optimize(doc_type)
        }
    }

    #[test]
    fn failed_event_discards_its_staged_writes() {
        let model = ModelService::new(Arc::new(InMemoryStorage::new()));
        let index = Arc::new(BrokenQueries(InMemoryIndex::new()));
        model.register_observer(Arc::new(IndexModelObserver::new(
            model.reader().clone(),
            index.clone(),
        )));

        // The package is stored even though indexing it failed.
        create(&model, "p1", None);
        assert!(model.retrieve_package(&pid("p1")).is_ok());
        assert_eq!(index.0.pending_count(), 0);

        index.commit().unwrap();
        assert!(index.0.is_empty());
    }
}
