//! Submission information package (SIP) containers.
//!
//! A SIP is a directory laid out as:
//!
//! ```text
//! <root>/
//!   sip.json                      optional manifest
//!   representations/<id>/data/**  payload files, folder layout preserved
//!   metadata/descriptive/<id>     descriptive metadata entries
//! ```
//!
//! The manifest may carry a label (the package title) and the declared
//! type of each descriptive metadata entry.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use arca_model::{ModelService, NewPackage};
use arca_types::{Package, PackageId, RelativePath, RepresentationId};

use crate::error::{PluginError, PluginResult};

pub const MANIFEST_FILE: &str = "sip.json";
pub const REPRESENTATIONS_DIR: &str = "representations";
pub const DATA_DIR: &str = "data";
pub const DESCRIPTIVE_METADATA_DIR: &str = "metadata/descriptive";

/// Optional `sip.json` manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipManifest {
    pub label: Option<String>,
    /// Declared type per descriptive metadata id.
    pub metadata_types: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SipFile {
    pub path: RelativePath,
    pub source: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SipRepresentation {
    pub id: RepresentationId,
    pub files: Vec<SipFile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SipMetadata {
    pub id: String,
    pub metadata_type: Option<String>,
    pub source: PathBuf,
}

/// A parsed SIP container. Payloads stay on disk until ingest streams them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sip {
    pub root: PathBuf,
    pub label: Option<String>,
    pub representations: Vec<SipRepresentation>,
    pub descriptive_metadata: Vec<SipMetadata>,
}

fn migration(root: &Path, reason: impl std::fmt::Display) -> PluginError {
    PluginError::Migration(format!("{}: {reason}", root.display()))
}

/// Entries of a directory sorted by name; a missing directory is empty.
fn sorted_entries(dir: &Path, root: &Path) -> PluginResult<Vec<fs::DirEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in &entries {
        if entry.file_name().to_str().is_none() {
            return Err(migration(root, format!("non UTF-8 name under {}", dir.display())));
        }
    }
    Ok(entries)
}

fn entry_name(entry: &fs::DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

impl Sip {
    /// Parse the container rooted at `root`.
    ///
    /// Anything that cannot be mapped onto the object model (no
    /// representations, invalid ids or path components, an unreadable
    /// manifest) is a migration error.
    pub fn parse(root: &Path) -> PluginResult<Self> {
        if !root.is_dir() {
            return Err(migration(root, "not a SIP directory"));
        }

        let manifest = match fs::read(root.join(MANIFEST_FILE)) {
            Ok(bytes) => serde_json::from_slice::<SipManifest>(&bytes)
                .map_err(|e| migration(root, format!("invalid {MANIFEST_FILE}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SipManifest::default(),
            Err(e) => return Err(e.into()),
        };

        let representations_dir = root.join(REPRESENTATIONS_DIR);
        if !representations_dir.is_dir() {
            return Err(migration(root, "no representations directory"));
        }
        let mut representations = Vec::new();
        for entry in sorted_entries(&representations_dir, root)? {
            if !entry.file_type()?.is_dir() {
                warn!(sip = %root.display(), entry = %entry_name(&entry), "ignoring stray file in representations");
                continue;
            }
            let id = RepresentationId::new(entry_name(&entry))
                .map_err(|e| migration(root, e))?;
            let files = Self::parse_files(root, &entry.path().join(DATA_DIR))?;
            representations.push(SipRepresentation { id, files });
        }
        if representations.is_empty() {
            return Err(migration(root, "SIP has no representations"));
        }

        let mut descriptive_metadata = Vec::new();
        for entry in sorted_entries(&root.join(DESCRIPTIVE_METADATA_DIR), root)? {
            if !entry.file_type()?.is_file() {
                continue;
            }
            let id = entry_name(&entry);
            descriptive_metadata.push(SipMetadata {
                metadata_type: manifest.metadata_types.get(&id).cloned(),
                id,
                source: entry.path(),
            });
        }

        debug!(
            sip = %root.display(),
            representations = representations.len(),
            metadata = descriptive_metadata.len(),
            "SIP parsed"
        );
        Ok(Self {
            root: root.to_path_buf(),
            label: manifest.label,
            representations,
            descriptive_metadata,
        })
    }

    fn parse_files(root: &Path, data: &Path) -> PluginResult<Vec<SipFile>> {
        if !data.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(data).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| migration(root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(data)
                .map_err(|e| migration(root, e))?;
            let mut components = relative
                .components()
                .map(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(str::to_string)
                        .ok_or_else(|| migration(root, format!("non UTF-8 path {}", relative.display())))
                })
                .collect::<PluginResult<Vec<String>>>()?;
            let name = components.pop().unwrap_or_default();
            let path = RelativePath::new(components, name).map_err(|e| migration(root, e))?;
            files.push(SipFile {
                path,
                source: entry.into_path(),
            });
        }
        Ok(files)
    }

    pub fn file_count(&self) -> usize {
        self.representations.iter().map(|r| r.files.len()).sum()
    }
}

/// Create a package from a parsed SIP.
///
/// The package starts inactive under `parent_id`. Representations are
/// created as originals and every payload is streamed unchanged. If any
/// step fails, the partially written package is removed before the error
/// is returned.
pub fn sip_to_package(
    model: &ModelService,
    sip: &Sip,
    parent_id: Option<PackageId>,
) -> PluginResult<Package> {
    let package = model.create_package(NewPackage {
        id: None,
        parent_id,
        title: sip.label.clone(),
        active: false,
        ..NewPackage::default()
    })?;

    match populate(model, &package.id, sip) {
        Ok(()) => {
            info!(
                package = %package.id,
                sip = %sip.root.display(),
                files = sip.file_count(),
                "SIP ingested"
            );
            Ok(model.retrieve_package(&package.id)?)
        }
        Err(e) => {
            if let Err(cleanup) = model.delete_package(&package.id) {
                warn!(package = %package.id, error = %cleanup, "could not remove partially ingested package");
            }
            Err(e)
        }
    }
}

fn populate(model: &ModelService, package_id: &PackageId, sip: &Sip) -> PluginResult<()> {
    for representation in &sip.representations {
        model.create_representation(package_id, representation.id.clone(), true)?;
        for file in &representation.files {
            let mut payload = fs::File::open(&file.source)?;
            model.create_file(package_id, &representation.id, &file.path, &mut payload)?;
        }
    }
    for metadata in &sip.descriptive_metadata {
        let mut payload = fs::File::open(&metadata.source)?;
        model.create_descriptive_metadata(
            package_id,
            &metadata.id,
            &mut payload,
            metadata.metadata_type.as_deref(),
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    /// Write a SIP with one representation `rep1` holding `files`.
    pub fn write_sip(root: &Path, files: &[(&str, &[u8])]) {
        write_representation(root, "rep1", files);
    }

    pub fn write_representation(root: &Path, id: &str, files: &[(&str, &[u8])]) {
        let data = root.join("representations").join(id).join("data");
        fs::create_dir_all(&data).unwrap();
        for (path, content) in files {
            let target = data.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
    }
}
