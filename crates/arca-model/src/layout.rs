//! Where canonical records live inside the storage gateway.
//!
//! ```text
//! aip/<package>/package.json
//! aip/<package>/representations/<rep>/data/<folders..>/<file>
//! aip/<package>/metadata/descriptive/<metadata id>
//! aip/<package>/metadata/preservation/<event id>.json
//! actionlog/<yyyy-mm-dd>.log
//! job/<job id>.json
//! job-report/<job id>.json
//! ```

use arca_store::{StoragePath, StoreResult};
use arca_types::{EventId, JobId, PackageId, RelativePath, RepresentationId};
use chrono::NaiveDate;

pub const AIP_CONTAINER: &str = "aip";
pub const ACTION_LOG_CONTAINER: &str = "actionlog";
pub const JOB_CONTAINER: &str = "job";
pub const JOB_REPORT_CONTAINER: &str = "job-report";

const PACKAGE_RECORD: &str = "package.json";
const REPRESENTATIONS: &str = "representations";
const DATA: &str = "data";
const METADATA: &str = "metadata";
const DESCRIPTIVE: &str = "descriptive";
const PRESERVATION: &str = "preservation";

pub fn container(name: &str) -> StoreResult<StoragePath> {
    StoragePath::from_components([name])
}

pub fn package_dir(id: &PackageId) -> StoreResult<StoragePath> {
    StoragePath::from_components([AIP_CONTAINER, id.as_str()])
}

pub fn package_record(id: &PackageId) -> StoreResult<StoragePath> {
    package_dir(id)?.child(PACKAGE_RECORD)
}

pub fn representation_dir(
    package: &PackageId,
    representation: &RepresentationId,
) -> StoreResult<StoragePath> {
    package_dir(package)?.join([REPRESENTATIONS, representation.as_str()])
}

/// Root under which a representation's files are stored.
pub fn representation_data(
    package: &PackageId,
    representation: &RepresentationId,
) -> StoreResult<StoragePath> {
    representation_dir(package, representation)?.child(DATA)
}

pub fn file_path(
    package: &PackageId,
    representation: &RepresentationId,
    path: &RelativePath,
) -> StoreResult<StoragePath> {
    representation_data(package, representation)?.join(path.components())
}

pub fn descriptive_metadata_dir(package: &PackageId) -> StoreResult<StoragePath> {
    package_dir(package)?.join([METADATA, DESCRIPTIVE])
}

pub fn descriptive_metadata(package: &PackageId, metadata_id: &str) -> StoreResult<StoragePath> {
    descriptive_metadata_dir(package)?.child(metadata_id)
}

pub fn preservation_dir(package: &PackageId) -> StoreResult<StoragePath> {
    package_dir(package)?.join([METADATA, PRESERVATION])
}

pub fn preservation_event(package: &PackageId, event: &EventId) -> StoreResult<StoragePath> {
    preservation_dir(package)?.child(format!("{event}.json"))
}

/// One action-log file per UTC day.
pub fn action_log(day: NaiveDate) -> StoreResult<StoragePath> {
    StoragePath::from_components([
        ACTION_LOG_CONTAINER.to_string(),
        format!("{}.log", day.format("%Y-%m-%d")),
    ])
}

pub fn job_record(id: &JobId) -> StoreResult<StoragePath> {
    StoragePath::from_components([JOB_CONTAINER.to_string(), format!("{id}.json")])
}

pub fn job_report_record(id: &JobId) -> StoreResult<StoragePath> {
    StoragePath::from_components([JOB_REPORT_CONTAINER.to_string(), format!("{id}.json")])
}
