use std::fmt;

use arca_types::{
    DescriptiveMetadata, File, Job, LogEntry, Package, PackageId, PreservationEvent,
    RelativePath, Report, Representation, RepresentationId,
};

/// Lifecycle event emitted after a successful mutation.
///
/// Closed set: every observer sees exactly these variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    PackageCreated(Package),
    PackageUpdated(Package),
    PackageDeleted(PackageId),
    RepresentationCreated(Representation),
    RepresentationDeleted {
        package_id: PackageId,
        representation_id: RepresentationId,
    },
    FileCreated(File),
    FileDeleted {
        package_id: PackageId,
        representation_id: RepresentationId,
        path: RelativePath,
    },
    DescriptiveMetadataCreated(DescriptiveMetadata),
    PreservationEventCreated(PreservationEvent),
    LogEntryCreated(LogEntry),
    JobCreatedOrUpdated(Job),
    JobReportCreatedOrUpdated(Report),
}

impl ModelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PackageCreated(_) => "packageCreated",
            Self::PackageUpdated(_) => "packageUpdated",
            Self::PackageDeleted(_) => "packageDeleted",
            Self::RepresentationCreated(_) => "representationCreated",
            Self::RepresentationDeleted { .. } => "representationDeleted",
            Self::FileCreated(_) => "fileCreated",
            Self::FileDeleted { .. } => "fileDeleted",
            Self::DescriptiveMetadataCreated(_) => "descriptiveMetadataCreated",
            Self::PreservationEventCreated(_) => "preservationEventCreated",
            Self::LogEntryCreated(_) => "logEntryCreated",
            Self::JobCreatedOrUpdated(_) => "jobCreatedOrUpdated",
            Self::JobReportCreatedOrUpdated(_) => "jobReportCreatedOrUpdated",
        }
    }

    /// The package the event concerns, if any.
    pub fn package_id(&self) -> Option<&PackageId> {
        match self {
            Self::PackageCreated(p) | Self::PackageUpdated(p) => Some(&p.id),
            Self::PackageDeleted(id) => Some(id),
            Self::RepresentationCreated(r) => Some(&r.package_id),
            Self::RepresentationDeleted { package_id, .. } | Self::FileDeleted { package_id, .. } => {
                Some(package_id)
            }
            Self::FileCreated(f) => Some(&f.package_id),
            Self::DescriptiveMetadataCreated(m) => Some(&m.package_id),
            Self::PreservationEventCreated(e) => Some(&e.package_id),
            Self::LogEntryCreated(_) | Self::JobCreatedOrUpdated(_) | Self::JobReportCreatedOrUpdated(_) => None,
        }
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.package_id() {
            Some(id) => write!(f, "{}({id})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}
