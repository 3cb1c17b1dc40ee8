use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::error;

use arca_store::{Binary, CloseableIter, Resource, StorageService, StoragePath, StoreError};
use arca_types::{
    DescriptiveMetadata, File, Job, JobId, Package, PackageId, PreservationEvent, RelativePath,
    Report, Representation, RepresentationId,
};

use crate::error::{ModelError, ModelResult};
use crate::layout;

/// Read side of the canonical model.
///
/// Cheap to clone; observers hold one to resolve related objects without
/// keeping the model service itself alive.
#[derive(Clone)]
pub struct ModelReader {
    storage: Arc<dyn StorageService>,
}

impl ModelReader {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.storage
    }

    pub(crate) fn read_json<T: DeserializeOwned>(
        &self,
        path: &StoragePath,
        what: impl FnOnce() -> String,
    ) -> ModelResult<T> {
        let bytes = self
            .storage
            .get_bytes(path)
            .map_err(ModelError::not_found_or(what))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The persisted package record, without representation file listings.
    pub fn package_record(&self, id: &PackageId) -> ModelResult<Package> {
        self.read_json(&layout::package_record(id)?, || format!("package {id}"))
    }

    pub fn package_exists(&self, id: &PackageId) -> ModelResult<bool> {
        Ok(self.storage.exists(&layout::package_record(id)?)?)
    }

    /// Parent link of `id`: `None` if the package cannot be resolved.
    ///
    /// Shaped for [`AncestorWalk`](arca_types::AncestorWalk) resolvers.
    pub fn resolve_parent(&self, id: &PackageId) -> Option<Option<PackageId>> {
        match self.package_record(id) {
            Ok(package) => Some(package.parent_id),
            Err(ModelError::NotFound(_)) => None,
            Err(e) => {
                error!(package = %id, error = %e, "failed to resolve parent link");
                None
            }
        }
    }

    pub fn retrieve_package(&self, id: &PackageId) -> ModelResult<Package> {
        let mut package = self.package_record(id)?;
        for representation in &mut package.representations {
            representation.files = self.file_paths(&package.id, &representation.id)?;
        }
        Ok(package)
    }

    pub fn retrieve_representation(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<Representation> {
        let package = self.package_record(package_id)?;
        let mut representation = package
            .representation(representation_id)
            .cloned()
            .ok_or_else(|| {
                ModelError::NotFound(format!("representation {package_id}/{representation_id}"))
            })?;
        representation.files = self.file_paths(package_id, representation_id)?;
        Ok(representation)
    }

    fn file_paths(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<Vec<RelativePath>> {
        self.files_under(package_id, representation_id)?
            .filter(|file| !matches!(file, Ok(f) if f.is_directory))
            .map(|file| file.map(|f| f.path))
            .collect()
    }

    fn files_under(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<CloseableIter<File, ModelError>> {
        let data = layout::representation_data(package_id, representation_id)?;
        let listing = match self.storage.list_under(&data, true) {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) => return Ok(CloseableIter::empty()),
            Err(e) => return Err(e.into()),
        };

        let package_id = package_id.clone();
        let representation_id = representation_id.clone();
        Ok(listing.filter_map_items(move |item| {
            Some(
                item.map_err(ModelError::from)
                    .and_then(|resource| to_file(&package_id, &representation_id, &data, resource)),
            )
        }))
    }

    /// Every file and folder of a representation, lazily.
    pub fn list_all_files(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
    ) -> ModelResult<CloseableIter<File, ModelError>> {
        let package = self.package_record(package_id)?;
        if package.representation(representation_id).is_none() {
            return Err(ModelError::NotFound(format!(
                "representation {package_id}/{representation_id}"
            )));
        }
        self.files_under(package_id, representation_id)
    }

    pub fn retrieve_file(
        &self,
        package_id: &PackageId,
        representation_id: &RepresentationId,
        path: &RelativePath,
    ) -> ModelResult<File> {
        let location = layout::file_path(package_id, representation_id, path)?;
        let resource = self
            .storage
            .stat(&location)
            .map_err(ModelError::not_found_or(|| {
                format!("file {package_id}/{representation_id}/{path}")
            }))?;
        let data = layout::representation_data(package_id, representation_id)?;
        to_file(package_id, representation_id, &data, resource)
    }

    /// Open a file's payload for reading.
    pub fn retrieve_file_content(&self, file: &File) -> ModelResult<Binary> {
        let location = layout::file_path(&file.package_id, &file.representation_id, &file.path)?;
        self.storage
            .get_payload(&location)
            .map_err(ModelError::not_found_or(|| format!("file content {}", file.path)))
    }

    /// Every package in the store, lazily. Restart by calling again.
    ///
    /// Packages whose record cannot be read are yielded as errors so the
    /// caller decides whether to skip them.
    pub fn list_packages(&self) -> ModelResult<CloseableIter<Package, ModelError>> {
        let listing = match self
            .storage
            .list_under(&layout::container(layout::AIP_CONTAINER)?, false)
        {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) => return Ok(CloseableIter::empty()),
            Err(e) => return Err(e.into()),
        };

        let reader = self.clone();
        Ok(listing.filter_map_items(move |item| match item {
            Ok(Resource::Directory(path)) => Some(
                PackageId::new(path.name())
                    .map_err(ModelError::from)
                    .and_then(|id| reader.retrieve_package(&id)),
            ),
            Ok(Resource::Binary(_)) => None,
            Err(e) => Some(Err(e.into())),
        }))
    }

    pub fn retrieve_descriptive_metadata(
        &self,
        package_id: &PackageId,
        metadata_id: &str,
    ) -> ModelResult<DescriptiveMetadata> {
        self.package_record(package_id)?
            .descriptive_metadata
            .into_iter()
            .find(|m| m.id == metadata_id)
            .ok_or_else(|| ModelError::NotFound(format!("descriptive metadata {package_id}/{metadata_id}")))
    }

    pub fn retrieve_descriptive_metadata_payload(
        &self,
        package_id: &PackageId,
        metadata_id: &str,
    ) -> ModelResult<Binary> {
        let path = layout::descriptive_metadata(package_id, metadata_id)?;
        self.storage
            .get_payload(&path)
            .map_err(ModelError::not_found_or(|| {
                format!("descriptive metadata {package_id}/{metadata_id}")
            }))
    }

    /// Preservation events of a package, oldest first.
    pub fn list_preservation_events(
        &self,
        package_id: &PackageId,
    ) -> ModelResult<Vec<PreservationEvent>> {
        if !self.package_exists(package_id)? {
            return Err(ModelError::NotFound(format!("package {package_id}")));
        }
        let listing = match self
            .storage
            .list_under(&layout::preservation_dir(package_id)?, false)
        {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for resource in listing {
            if let Resource::Binary(info) = resource? {
                events.push(self.read_json::<PreservationEvent>(&info.path, || info.path.to_string())?);
            }
        }
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Action-log files, one per day, oldest first.
    pub fn list_action_log_files(&self) -> ModelResult<CloseableIter<StoragePath, ModelError>> {
        let listing = match self
            .storage
            .list_under(&layout::container(layout::ACTION_LOG_CONTAINER)?, false)
        {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) => return Ok(CloseableIter::empty()),
            Err(e) => return Err(e.into()),
        };
        Ok(listing.filter_map_items(|item| match item {
            Ok(Resource::Binary(info)) => Some(Ok(info.path)),
            Ok(Resource::Directory(_)) => None,
            Err(e) => Some(Err(e.into())),
        }))
    }

    pub fn retrieve_job(&self, id: &JobId) -> ModelResult<Job> {
        self.read_json(&layout::job_record(id)?, || format!("job {id}"))
    }

    pub fn retrieve_job_report(&self, id: &JobId) -> ModelResult<Report> {
        self.read_json(&layout::job_report_record(id)?, || format!("job report {id}"))
    }
}

impl std::fmt::Debug for ModelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelReader").finish_non_exhaustive()
    }
}

fn to_file(
    package_id: &PackageId,
    representation_id: &RepresentationId,
    data: &StoragePath,
    resource: Resource,
) -> ModelResult<File> {
    let relative = resource
        .path()
        .relative_to(data)
        .ok_or_else(|| ModelError::RequestInvalid(format!("{} is outside {data}", resource.path())))?;
    let (name, folders) = relative
        .split_last()
        .ok_or_else(|| ModelError::RequestInvalid(format!("empty path under {data}")))?;
    let path = RelativePath::new(folders.to_vec(), name.clone())?;

    let (is_directory, size, digest) = match &resource {
        Resource::Binary(info) => (false, info.size, Some(info.digest.clone())),
        Resource::Directory(_) => (true, 0, None),
    };
    Ok(File {
        package_id: package_id.clone(),
        representation_id: representation_id.clone(),
        path,
        is_directory,
        size,
        content_locator: resource.path().to_string(),
        digest,
    })
}
