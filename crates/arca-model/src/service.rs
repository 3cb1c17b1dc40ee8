use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use arca_store::{CloseableIter, StorageService, StoragePath, StoreError};
use arca_types::validation::validate_id;
use arca_types::{
    check_parent_link, DescriptiveMetadata, File, Job, JobId, LogEntry, Package, PackageId,
    Permissions, PreservationEvent, RelativePath, Report, Representation, RepresentationId,
};

use crate::error::{ModelError, ModelResult};
use crate::event::ModelEvent;
use crate::layout;
use crate::observer::ModelObserver;
use crate::reader::ModelReader;

/// Parameters for [`ModelService::create_package`].
#[derive(Clone, Debug, Default)]
pub struct NewPackage {
    /// Caller-chosen id; a fresh one is generated when `None`.
    pub id: Option<PackageId>,
    pub parent_id: Option<PackageId>,
    pub title: Option<String>,
    pub active: bool,
    /// Explicit grants. When empty, the parent's grants are inherited.
    pub permissions: Permissions,
}

/// The only writer of canonical object state.
///
/// Every mutation is applied through the storage gateway first; only when
/// that succeeds are the registered observers notified, synchronously and
/// in registration order. Observer failures are logged and never undo the
/// mutation.
pub struct ModelService {
    reader: ModelReader,
    observers: RwLock<Vec<Arc<dyn ModelObserver>>>,
    package_locks: Mutex<HashMap<PackageId, Arc<Mutex<()>>>>,
    action_log_lock: Mutex<()>,
}

impl ModelService {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self {
            reader: ModelReader::new(storage),
            observers: RwLock::new(Vec::new()),
            package_locks: Mutex::new(HashMap::new()),
            action_log_lock: Mutex::new(()),
        }
    }

    pub fn reader(&self) -> &ModelReader {
        &self.reader
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        self.reader.storage()
    }

    pub fn register_observer(&self, observer: Arc<dyn ModelObserver>) {
        debug!(observer = observer.name(), "observer registered");
        self.observers
            .write()
            .expect("lock poisoned")
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().expect("lock poisoned").len()
    }

    fn notify(&self, event: ModelEvent) {
        let observers = self.observers.read().expect("lock poisoned").clone();
        for observer in observers {
            if let Err(e) = observer.notify(&event) {
                error!(
                    observer = observer.name(),
                    event = %event,
                    error = %e,
                    "observer failed; storage change kept"
                );
            }
        }
    }

    /// Serializes read-modify-write cycles on one package record.
    fn package_lock(&self, id: &PackageId) -> Arc<Mutex<()>> {
        self.package_locks
            .lock()
            .expect("lock poisoned")
            .entry(id.clone())
            .or_default()
            .clone()
    }

    fn write_json<T: Serialize>(&self, path: &StoragePath, value: &T) -> ModelResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.storage().put_bytes(path, &bytes)?;
        Ok(())
    }

    fn write_package_record(&self, package: &Package) -> ModelResult<()> {
        self.write_json(&layout::package_record(&package.id)?, package)
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    pub fn create_package(&self, new: NewPackage) -> ModelResult<Package> {
        let id = new.id.unwrap_or_else(PackageId::generate);
        let lock = self.package_lock(&id);
        let _guard = lock.lock().expect("lock poisoned");

        if self.reader.package_exists(&id)? {
            return Err(ModelError::AlreadyExists(format!("package {id}")));
        }
        check_parent_link(&id, new.parent_id.as_ref(), |p| self.reader.resolve_parent(p))?;

        let mut permissions = new.permissions;
        if let Some(parent_id) = &new.parent_id {
            match self.reader.package_record(parent_id) {
                Ok(parent) if permissions.is_empty() => permissions = parent.permissions,
                Ok(_) => {}
                Err(ModelError::NotFound(_)) => {
                    warn!(package = %id, parent = %parent_id, "parent package does not exist; keeping dangling link");
                }
                Err(e) => return Err(e),
            }
        }

        let now = Utc::now();
        let package = Package {
            id,
            parent_id: new.parent_id,
            title: new.title,
            active: new.active,
            permissions,
            representations: Vec::new(),
            descriptive_metadata: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.write_package_record(&package)?;

        info!(package = %package.id, active = package.active, "package created");
        self.notify(ModelEvent::PackageCreated(package.clone()));
        Ok(package)
    }

    pub fn retrieve_package(&self, id: &PackageId) -> ModelResult<Package> {
        self.reader.retrieve_package(id)
    }

    pub fn list_packages(&self) -> ModelResult<CloseableIter<Package, ModelError>> {
        self.reader.list_packages()
    }

    /// Re-parent a package. Rejects links that would close a cycle.
    pub fn move_package(&self, id: &PackageId, parent_id: Option<PackageId>) -> ModelResult<Package> {
        let lock = self.package_lock(id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut package = self.reader.package_record(id)?;
        check_parent_link(id, parent_id.as_ref(), |p| self.reader.resolve_parent(p))?;
        package.parent_id = parent_id;
        package.updated_at = Utc::now();
        self.write_package_record(&package)?;

        info!(package = %id, parent = ?package.parent_id, "package moved");
        let package = self.reader.retrieve_package(id)?;
        self.notify(ModelEvent::PackageUpdated(package.clone()));
        Ok(package)
    }

    /// Flip the `active` flag, e.g. once ingest has been accepted.
    pub fn set_package_active(&self, id: &PackageId, active: bool) -> ModelResult<Package> {
        let lock = self.package_lock(id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut package = self.reader.package_record(id)?;
        package.active = active;
        package.updated_at = Utc::now();
        self.write_package_record(&package)?;

        let package = self.reader.retrieve_package(id)?;
        self.notify(ModelEvent::PackageUpdated(package.clone()));
        Ok(package)
    }

    /// Delete a package with all of its representations, files and metadata.
    ///
    /// Children keep their (now dangling) parent link.
    pub fn delete_package(&self, id: &PackageId) -> ModelResult<()> {
        let lock = self.package_lock(id);
        {
            let _guard = lock.lock().expect("lock poisoned");
            if !self.reader.package_exists(id)? {
                return Err(ModelError::NotFound(format!("package {id}")));
            }
            self.storage().delete(&layout::package_dir(id)?)?;
        }
        self.package_locks.lock().expect("lock poisoned").remove(id);

        info!(package = %id, "package deleted");
        self.notify(ModelEvent::PackageDeleted(id.clone()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Representations
    // -----------------------------------------------------------------------

    pub fn create_representation(
        &self,
        package_id: &PackageId,
        representation_id: RepresentationId,
        original: bool,
    ) -> ModelResult<Representation> {
        let lock = self.package_lock(package_id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut package = self.reader.package_record(package_id)?;
        package.ensure_new_representation(&representation_id)?;

        let representation = Representation::new(package_id.clone(), representation_id, original);
        self.storage()
            .create_directory(&layout::representation_data(package_id, &representation.id)?)?;
        package.representations.push(representation.clone());
        package.updated_at = Utc::now();
        self.write_package_record(&package)?;

        info!(package = %package_id, representation = %representation.id, original, "representation created");
        self.notify(ModelEvent::RepresentationCreated(representation.clone()));
        Ok(representation)
    }

    pub fn retrieve_representation(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<Representation> {
        self.reader.retrieve_representation(package_id, representation_id)
    }

    pub fn delete_representation(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<()> {
        let lock = self.package_lock(package_id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut package = self.reader.package_record(package_id)?;
        let before = package.representations.len();
        package.representations.retain(|r| &r.id != representation_id);
        if package.representations.len() == before {
            return Err(ModelError::NotFound(format!(
                "representation {package_id}/{representation_id}"
            )));
        }

        match self
            .storage()
            .delete(&layout::representation_dir(package_id, representation_id)?)
        {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        package.updated_at = Utc::now();
        self.write_package_record(&package)?;

        info!(package = %package_id, representation = %representation_id, "representation deleted");
        self.notify(ModelEvent::RepresentationDeleted {
            package_id: package_id.clone(),
            representation_id: representation_id.clone(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Stream a payload into a new file. Existing files are never overwritten;
    /// replace one with [`delete_file`](Self::delete_file) first.
    pub fn create_file(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
        path: &RelativePath,
        payload: &mut dyn Read,
    ) -> ModelResult<File> {
        let info = {
            let lock = self.package_lock(package_id);
            let _guard = lock.lock().expect("lock poisoned");

            let package = self.reader.package_record(package_id)?;
            if package.representation(representation_id).is_none() {
                return Err(ModelError::NotFound(format!(
                    "representation {package_id}/{representation_id}"
                )));
            }

            let location = layout::file_path(package_id, representation_id, path)?;
            if self.storage().exists(&location)? {
                return Err(ModelError::AlreadyExists(format!(
                    "file {package_id}/{representation_id}/{path}"
                )));
            }
            self.storage().put_payload(&location, payload)?
        };

        let file = File {
            package_id: package_id.clone(),
            representation_id: representation_id.clone(),
            path: path.clone(),
            is_directory: false,
            size: info.size,
            content_locator: info.path.to_string(),
            digest: Some(info.digest),
        };
        debug!(package = %package_id, representation = %representation_id, path = %path, size = file.size, "file created");
        self.notify(ModelEvent::FileCreated(file.clone()));
        Ok(file)
    }

    pub fn delete_file(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
        path: &RelativePath,
    ) -> ModelResult<()> {
        let location = layout::file_path(package_id, representation_id, path)?;
        self.storage()
            .delete(&location)
            .map_err(ModelError::not_found_or(|| {
                format!("file {package_id}/{representation_id}/{path}")
            }))?;

        debug!(package = %package_id, representation = %representation_id, path = %path, "file deleted");
        self.notify(ModelEvent::FileDeleted {
            package_id: package_id.clone(),
            representation_id: representation_id.clone(),
            path: path.clone(),
        });
        Ok(())
    }

    pub fn retrieve_file(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
        path: &RelativePath,
    ) -> ModelResult<File> {
        self.reader.retrieve_file(package_id, representation_id, path)
    }

    pub fn list_all_files(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<CloseableIter<File, ModelError>> {
        self.reader.list_all_files(package_id, representation_id)
    }

    // -----------------------------------------------------------------------
    // Metadata and provenance
    // -----------------------------------------------------------------------

    /// Attach a descriptive metadata entry. `metadata_type` defaults to `plain`.
    pub fn create_descriptive_metadata(
        &self,
        package_id: &PackageId,
        metadata_id: &str,
        payload: &mut dyn Read,
        metadata_type: Option<&str>,
    ) -> ModelResult<DescriptiveMetadata> {
        validate_id(metadata_id)?;
        let lock = self.package_lock(package_id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut package = self.reader.package_record(package_id)?;
        package
            .ensure_new_metadata(metadata_id)
            .map_err(|_| ModelError::AlreadyExists(format!("descriptive metadata {package_id}/{metadata_id}")))?;

        let info = self
            .storage()
            .put_payload(&layout::descriptive_metadata(package_id, metadata_id)?, payload)?;
        let metadata = DescriptiveMetadata {
            package_id: package_id.clone(),
            id: metadata_id.to_string(),
            metadata_type: DescriptiveMetadata::type_or_default(metadata_type),
            size: info.size,
            content_locator: info.path.to_string(),
        };
        package.descriptive_metadata.push(metadata.clone());
        package.updated_at = Utc::now();
        self.write_package_record(&package)?;

        info!(package = %package_id, metadata = metadata_id, kind = %metadata.metadata_type, "descriptive metadata created");
        self.notify(ModelEvent::DescriptiveMetadataCreated(metadata.clone()));
        Ok(metadata)
    }

    pub fn retrieve_descriptive_metadata(
        &self,
        package_id: &PackageId,
        metadata_id: &str,
    ) -> ModelResult<DescriptiveMetadata> {
        self.reader.retrieve_descriptive_metadata(package_id, metadata_id)
    }

    /// Append a provenance record. Events are immutable once written.
    pub fn create_preservation_event(&self, event: PreservationEvent) -> ModelResult<PreservationEvent> {
        if !self.reader.package_exists(&event.package_id)? {
            return Err(ModelError::NotFound(format!("package {}", event.package_id)));
        }
        let path = layout::preservation_event(&event.package_id, &event.id)?;
        if self.storage().exists(&path)? {
            return Err(ModelError::AlreadyExists(format!("preservation event {}", event.id)));
        }
        self.write_json(&path, &event)?;

        info!(
            package = %event.package_id,
            event_type = %event.event_type,
            outcome = %event.outcome,
            altered = event.affected_file_ids.len(),
            "preservation event recorded"
        );
        self.notify(ModelEvent::PreservationEventCreated(event.clone()));
        Ok(event)
    }

    pub fn list_preservation_events(&self, package_id: &PackageId) -> ModelResult<Vec<PreservationEvent>> {
        self.reader.list_preservation_events(package_id)
    }

    /// Append an entry to the day's action log as one JSON line.
    pub fn add_log_entry(&self, entry: LogEntry) -> ModelResult<LogEntry> {
        let path = layout::action_log(entry.datetime.date_naive())?;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        {
            let _guard = self.action_log_lock.lock().expect("lock poisoned");
            let mut content = match self.storage().get_bytes(&path) {
                Ok(existing) => existing,
                Err(StoreError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            content.extend_from_slice(&line);
            self.storage().put_bytes(&path, &content)?;
        }

        self.notify(ModelEvent::LogEntryCreated(entry.clone()));
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub fn create_or_update_job(&self, job: &Job) -> ModelResult<()> {
        self.write_json(&layout::job_record(&job.id)?, job)?;
        debug!(job = %job.id, state = ?job.state, "job persisted");
        self.notify(ModelEvent::JobCreatedOrUpdated(job.clone()));
        Ok(())
    }

    pub fn create_or_update_job_report(&self, report: &Report) -> ModelResult<()> {
        self.write_json(&layout::job_report_record(&report.job_id)?, report)?;
        debug!(job = %report.job_id, items = report.items.len(), sealed = report.sealed, "job report persisted");
        self.notify(ModelEvent::JobReportCreatedOrUpdated(report.clone()));
        Ok(())
    }

    pub fn retrieve_job(&self, id: &JobId) -> ModelResult<Job> {
        self.reader.retrieve_job(id)
    }

    pub fn retrieve_job_report(&self, id: &JobId) -> ModelResult<Report> {
        self.reader.retrieve_job_report(id)
    }
}

impl std::fmt::Debug for ModelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelService")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use arca_store::InMemoryStorage;
    use arca_types::{EventId, EventOutcome, PermissionType, TypeError};

    use super::*;
    use crate::observer::testing::RecordingObserver;

    fn service() -> (Arc<InMemoryStorage>, ModelService) {
        let storage = Arc::new(InMemoryStorage::new());
        let model = ModelService::new(storage.clone());
        (storage, model)
    }

    fn pkg(id: &str) -> PackageId {
        PackageId::new(id).unwrap()
    }

    fn rep(id: &str) -> RepresentationId {
        RepresentationId::new(id).unwrap()
    }

    fn new_package(id: &str, parent: Option<&str>) -> NewPackage {
        NewPackage {
            id: Some(pkg(id)),
            parent_id: parent.map(pkg),
            ..NewPackage::default()
        }
    }

    // --- packages -----------------------------------------------------------

    #[test]
    fn create_and_retrieve_package() {
        let (_, model) = service();
        let created = model.create_package(new_package("p1", None)).unwrap();
        assert!(!created.active);

        let read = model.retrieve_package(&pkg("p1")).unwrap();
        assert_eq!(read.id, created.id);
        assert!(read.representations.is_empty());
    }

    #[test]
    fn duplicate_package_is_rejected() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        let err = model.create_package(new_package("p1", None)).unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
    }

    #[test]
    fn missing_package_is_not_found() {
        let (_, model) = service();
        let err = model.retrieve_package(&pkg("nope")).unwrap_err();
        assert_eq!(err.kind(), arca_types::ErrorKind::NotFound);
    }

    #[test]
    fn child_inherits_parent_permissions() {
        let (_, model) = service();
        let mut parent = new_package("p1", None);
        parent.permissions.grant(PermissionType::Read, "archivists");
        model.create_package(parent).unwrap();

        let child = model.create_package(new_package("p2", Some("p1"))).unwrap();
        assert_eq!(
            child.permissions.principals(PermissionType::Read).collect::<Vec<_>>(),
            vec!["archivists"]
        );
    }

    #[test]
    fn dangling_parent_is_accepted() {
        let (_, model) = service();
        let child = model.create_package(new_package("p2", Some("ghost"))).unwrap();
        assert_eq!(child.parent_id, Some(pkg("ghost")));
    }

    #[test]
    fn move_rejects_cycle() {
        let (_, model) = service();
        model.create_package(new_package("a", None)).unwrap();
        model.create_package(new_package("b", Some("a"))).unwrap();
        model.create_package(new_package("c", Some("b"))).unwrap();

        let err = model.move_package(&pkg("a"), Some(pkg("c"))).unwrap_err();
        assert!(matches!(err, ModelError::Type(TypeError::Cycle { .. })));
        assert!(model.retrieve_package(&pkg("a")).unwrap().parent_id.is_none());

        let moved = model.move_package(&pkg("c"), Some(pkg("a"))).unwrap();
        assert_eq!(moved.parent_id, Some(pkg("a")));
    }

    #[test]
    fn delete_package_removes_everything() {
        let (storage, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        model
            .create_file(&pkg("p1"), &rep("r1"), &RelativePath::parse("a.txt").unwrap(), &mut &b"a"[..])
            .unwrap();

        model.delete_package(&pkg("p1")).unwrap();
        assert_eq!(storage.binary_count(), 0);
        assert!(matches!(
            model.delete_package(&pkg("p1")),
            Err(ModelError::NotFound(_))
        ));
    }

    #[test]
    fn list_packages_is_restartable_and_releases() {
        let (storage, model) = service();
        assert_eq!(model.list_packages().unwrap().count(), 0);

        for id in ["p1", "p2", "p3"] {
            model.create_package(new_package(id, None)).unwrap();
        }
        let first: Vec<_> = model.list_packages().unwrap().map(|p| p.unwrap().id).collect();
        let second: Vec<_> = model.list_packages().unwrap().map(|p| p.unwrap().id).collect();
        assert_eq!(first, vec![pkg("p1"), pkg("p2"), pkg("p3")]);
        assert_eq!(first, second);
        assert_eq!(storage.open_listings(), 0);
    }

    // --- representations and files -----------------------------------------

    #[test]
    fn representation_ids_are_unique_per_package() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_package(new_package("p2", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        model.create_representation(&pkg("p2"), rep("r1"), true).unwrap();

        let err = model.create_representation(&pkg("p1"), rep("r1"), false).unwrap_err();
        assert_eq!(err.kind(), arca_types::ErrorKind::AlreadyExists);
    }

    #[test]
    fn files_preserve_folder_layout() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        for path in ["a.jpg", "b.txt", "c/d.jpg"] {
            model
                .create_file(&pkg("p1"), &rep("r1"), &RelativePath::parse(path).unwrap(), &mut &b"x"[..])
                .unwrap();
        }

        let representation = model.retrieve_representation(&pkg("p1"), &rep("r1")).unwrap();
        let paths: Vec<_> = representation.files.iter().map(ToString::to_string).collect();
        assert_eq!(paths, vec!["a.jpg", "b.txt", "c/d.jpg"]);

        let all: Vec<_> = model
            .list_all_files(&pkg("p1"), &rep("r1"))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(all.len(), 4);
        assert!(all.iter().any(|f| f.is_directory && f.path.name == "c"));
        let d = all.iter().find(|f| f.id() == "d.jpg").unwrap();
        assert_eq!(d.path.folders, vec!["c".to_string()]);
        assert_eq!(d.size, 1);
    }

    #[test]
    fn file_is_not_overwritten() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        let path = RelativePath::parse("a.txt").unwrap();
        model.create_file(&pkg("p1"), &rep("r1"), &path, &mut &b"one"[..]).unwrap();

        let err = model
            .create_file(&pkg("p1"), &rep("r1"), &path, &mut &b"two"[..])
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));

        model.delete_file(&pkg("p1"), &rep("r1"), &path).unwrap();
        model.create_file(&pkg("p1"), &rep("r1"), &path, &mut &b"two"[..]).unwrap();
        let file = model.retrieve_file(&pkg("p1"), &rep("r1"), &path).unwrap();
        let content = model.reader().retrieve_file_content(&file).unwrap().into_bytes().unwrap();
        assert_eq!(content, b"two");
    }

    /// Payload that stalls before yielding its bytes.
    struct Slow(&'static [u8]);

    impl Read for Slow {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.0.read(buf)
        }
    }

    #[test]
    fn concurrent_creates_of_one_path_admit_a_single_writer() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        let path = RelativePath::parse("a.txt").unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = [&b"one"[..], &b"two"[..], &b"six"[..]]
                .into_iter()
                .map(|payload| {
                    let (model, path) = (&model, &path);
                    scope.spawn(move || model.create_file(&pkg("p1"), &rep("r1"), path, &mut Slow(payload)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ModelError::AlreadyExists(_))));

        let stored = model.retrieve_file(&pkg("p1"), &rep("r1"), &path).unwrap();
        assert_eq!(stored.digest, created[0].digest);
    }

    #[test]
    fn file_in_unknown_representation_is_not_found() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        let err = model
            .create_file(&pkg("p1"), &rep("r9"), &RelativePath::parse("a").unwrap(), &mut &b""[..])
            .unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
        assert!(matches!(
            model.delete_file(&pkg("p1"), &rep("r9"), &RelativePath::parse("a").unwrap()),
            Err(ModelError::NotFound(_))
        ));
    }

    #[test]
    fn delete_representation_drops_record_and_files() {
        let (storage, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        model
            .create_file(&pkg("p1"), &rep("r1"), &RelativePath::parse("a").unwrap(), &mut &b"a"[..])
            .unwrap();

        model.delete_representation(&pkg("p1"), &rep("r1")).unwrap();
        assert!(model.retrieve_package(&pkg("p1")).unwrap().representations.is_empty());
        assert_eq!(storage.binary_count(), 1);
    }

    // --- metadata, events, log ----------------------------------------------

    #[test]
    fn descriptive_metadata_defaults_to_plain() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        let md = model
            .create_descriptive_metadata(&pkg("p1"), "dc.xml", &mut &b"<dc/>"[..], None)
            .unwrap();
        assert_eq!(md.metadata_type, "plain");

        let err = model
            .create_descriptive_metadata(&pkg("p1"), "dc.xml", &mut &b"<dc/>"[..], Some("dc"))
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
        assert_eq!(
            model.retrieve_descriptive_metadata(&pkg("p1"), "dc.xml").unwrap().size,
            5
        );
    }

    #[test]
    fn preservation_events_are_append_only() {
        let (_, model) = service();
        model.create_package(new_package("p1", None)).unwrap();
        let event = PreservationEvent {
            id: EventId::generate(),
            package_id: pkg("p1"),
            representation_id: None,
            event_type: "migration".into(),
            outcome: EventOutcome::Success,
            affected_file_ids: vec!["a.jpg".into()],
            details: BTreeMap::new(),
            timestamp: Utc::now(),
            agent: "test".into(),
        };
        model.create_preservation_event(event.clone()).unwrap();
        assert!(matches!(
            model.create_preservation_event(event.clone()),
            Err(ModelError::AlreadyExists(_))
        ));
        assert_eq!(model.list_preservation_events(&pkg("p1")).unwrap(), vec![event]);
    }

    #[test]
    fn log_entries_append_as_json_lines() {
        let (storage, model) = service();
        let first = model.add_log_entry(LogEntry::new("ingest", "run")).unwrap();
        model.add_log_entry(LogEntry::new("convert", "run")).unwrap();

        let path = layout::action_log(first.datetime.date_naive()).unwrap();
        let text = String::from_utf8(storage.get_bytes(&path).unwrap()).unwrap();
        let lines: Vec<LogEntry> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], first);
    }

    #[test]
    fn job_and_report_roundtrip() {
        let (_, model) = service();
        let job = Job::new("convert", BTreeMap::new(), 2);
        model.create_or_update_job(&job).unwrap();
        assert_eq!(model.retrieve_job(&job.id).unwrap(), job);

        let report = Report::new(job.id.clone(), "convert");
        model.create_or_update_job_report(&report).unwrap();
        assert_eq!(model.retrieve_job_report(&job.id).unwrap(), report);
        assert!(matches!(
            model.retrieve_job(&JobId::generate()),
            Err(ModelError::NotFound(_))
        ));
    }

    // --- observers ----------------------------------------------------------

    #[test]
    fn observers_see_events_in_order() {
        let (_, model) = service();
        let observer = Arc::new(RecordingObserver::default());
        model.register_observer(observer.clone());

        model.create_package(new_package("p1", None)).unwrap();
        model.create_representation(&pkg("p1"), rep("r1"), true).unwrap();
        model
            .create_file(&pkg("p1"), &rep("r1"), &RelativePath::parse("a").unwrap(), &mut &b"a"[..])
            .unwrap();
        model.delete_file(&pkg("p1"), &rep("r1"), &RelativePath::parse("a").unwrap()).unwrap();

        assert_eq!(
            observer.names(),
            vec!["packageCreated", "representationCreated", "fileCreated", "fileDeleted"]
        );
    }

    #[test]
    fn failed_mutation_notifies_nobody() {
        let (_, model) = service();
        let observer = Arc::new(RecordingObserver::default());
        model.register_observer(observer.clone());

        assert!(model.create_representation(&pkg("ghost"), rep("r1"), true).is_err());
        assert!(observer.names().is_empty());
    }

    #[test]
    fn observer_failure_keeps_mutation() {
        let (_, model) = service();
        let failing = Arc::new(RecordingObserver::failing());
        let healthy = Arc::new(RecordingObserver::default());
        model.register_observer(failing.clone());
        model.register_observer(healthy.clone());

        model.create_package(new_package("p1", None)).unwrap();
        assert!(model.retrieve_package(&pkg("p1")).is_ok());
        assert_eq!(failing.names(), vec!["packageCreated"]);
        assert_eq!(healthy.names(), vec!["packageCreated"]);
    }
}
