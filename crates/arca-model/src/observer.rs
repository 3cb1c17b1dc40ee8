use arca_types::{
    DescriptiveMetadata, File, Job, LogEntry, Package, PackageId, PreservationEvent,
    RelativePath, Report, Representation, RepresentationId,
};

use crate::event::ModelEvent;

/// Error type observers may return. The model service logs it and moves on.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for observer callbacks.
pub type ObserverResult = Result<(), ObserverError>;

/// Receiver of model lifecycle events.
///
/// One method per capability, each a no-op by default, so an observer only
/// implements what it projects. [`notify`](Self::notify) dispatches a
/// [`ModelEvent`] to the matching method.
pub trait ModelObserver: Send + Sync {
    /// Name used in log records.
    fn name(&self) -> &str {
        "observer"
    }

    fn package_created(&self, _package: &Package) -> ObserverResult {
        Ok(())
    }

    fn package_updated(&self, _package: &Package) -> ObserverResult {
        Ok(())
    }

    fn package_deleted(&self, _id: &PackageId) -> ObserverResult {
        Ok(())
    }

    fn representation_created(&self, _representation: &Representation) -> ObserverResult {
        Ok(())
    }

    fn representation_deleted(
        &self,
        _package_id: &PackageId,
        _representation_id: &RepresentationId,
    ) -> ObserverResult {
        Ok(())
    }

    fn file_created(&self, _file: &File) -> ObserverResult {
        Ok(())
    }

    fn file_deleted(
        &self,
        _package_id: &PackageId,
        _representation_id: &RepresentationId,
        _path: &RelativePath,
    ) -> ObserverResult {
        Ok(())
    }

    fn descriptive_metadata_created(&self, _metadata: &DescriptiveMetadata) -> ObserverResult {
        Ok(())
    }

    fn preservation_event_created(&self, _event: &PreservationEvent) -> ObserverResult {
        Ok(())
    }

    fn log_entry_created(&self, _entry: &LogEntry) -> ObserverResult {
        Ok(())
    }

    fn job_created_or_updated(&self, _job: &Job) -> ObserverResult {
        Ok(())
    }

    fn job_report_created_or_updated(&self, _report: &Report) -> ObserverResult {
        Ok(())
    }

    fn notify(&self, event: &ModelEvent) -> ObserverResult {
        match event {
            ModelEvent::PackageCreated(p) => self.package_created(p),
            ModelEvent::PackageUpdated(p) => self.package_updated(p),
            ModelEvent::PackageDeleted(id) => self.package_deleted(id),
            ModelEvent::RepresentationCreated(r) => self.representation_created(r),
            ModelEvent::RepresentationDeleted {
                package_id,
                representation_id,
            } => self.representation_deleted(package_id, representation_id),
            ModelEvent::FileCreated(f) => self.file_created(f),
            ModelEvent::FileDeleted {
                package_id,
                representation_id,
                path,
            } => self.file_deleted(package_id, representation_id, path),
            ModelEvent::DescriptiveMetadataCreated(m) => self.descriptive_metadata_created(m),
            ModelEvent::PreservationEventCreated(e) => self.preservation_event_created(e),
            ModelEvent::LogEntryCreated(e) => self.log_entry_created(e),
            ModelEvent::JobCreatedOrUpdated(j) => self.job_created_or_updated(j),
            ModelEvent::JobReportCreatedOrUpdated(r) => self.job_report_created_or_updated(r),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct DeletesOnly {
        deleted: Mutex<Vec<String>>,
    }

    impl ModelObserver for DeletesOnly {
        fn package_deleted(&self, id: &PackageId) -> ObserverResult {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    #[test]
    fn dispatch_reaches_matching_method_only() {
        let observer = DeletesOnly::default();
        let id = PackageId::new("p1").unwrap();
        observer.notify(&ModelEvent::PackageDeleted(id)).unwrap();
        observer
            .notify(&ModelEvent::LogEntryCreated(LogEntry::new("ingest", "run")))
            .unwrap();
        assert_eq!(*observer.deleted.lock().unwrap(), vec!["p1".to_string()]);
    }
}
