use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{PackageId, RepresentationId};
use crate::metadata::DescriptiveMetadata;
use crate::validation::{ensure_unique, validate_path_component};

/// Kinds of access a permission grant can confer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    Read,
    Update,
    Delete,
    Grant,
}

/// Principals (users or groups) granted each permission on a package.
///
/// Permissions are carried as data only; enforcement belongs to the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub grants: BTreeMap<PermissionType, BTreeSet<String>>,
}

impl Permissions {
    pub fn grant(&mut self, permission: PermissionType, principal: impl Into<String>) {
        self.grants
            .entry(permission)
            .or_default()
            .insert(principal.into());
    }

    pub fn principals(&self, permission: PermissionType) -> impl Iterator<Item = &str> {
        self.grants
            .get(&permission)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.grants.values().all(BTreeSet::is_empty)
    }
}

/// Root unit of preservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub parent_id: Option<PackageId>,
    pub title: Option<String>,
    pub active: bool,
    pub permissions: Permissions,
    pub representations: Vec<Representation>,
    pub descriptive_metadata: Vec<DescriptiveMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    pub fn representation(&self, id: &RepresentationId) -> Option<&Representation> {
        self.representations.iter().find(|r| &r.id == id)
    }

    pub fn representation_ids(&self) -> impl Iterator<Item = &RepresentationId> {
        self.representations.iter().map(|r| &r.id)
    }

    /// Fail if `id` is already used by a representation of this package.
    pub fn ensure_new_representation(&self, id: &RepresentationId) -> Result<(), TypeError> {
        ensure_unique(
            "representation",
            self.representations.iter().map(|r| r.id.as_str()),
            id.as_str(),
        )
    }

    /// Fail if `id` is already used by a descriptive metadata entry.
    pub fn ensure_new_metadata(&self, id: &str) -> Result<(), TypeError> {
        ensure_unique(
            "descriptive metadata",
            self.descriptive_metadata.iter().map(|m| m.id.as_str()),
            id,
        )
    }
}

/// One rendering of a package's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representation {
    pub id: RepresentationId,
    pub package_id: PackageId,
    pub original: bool,
    /// Relative paths of the files held by this representation. Derived from
    /// storage on read; never persisted with the record.
    #[serde(skip)]
    pub files: Vec<RelativePath>,
    pub created_at: DateTime<Utc>,
}

impl Representation {
    pub fn new(package_id: PackageId, id: RepresentationId, original: bool) -> Self {
        Self {
            id,
            package_id,
            original,
            files: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Folder names plus a file name, relative to a representation's data root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    pub folders: Vec<String>,
    pub name: String,
}

impl RelativePath {
    /// Build a path, rejecting any component that could escape the root.
    pub fn new(folders: Vec<String>, name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        for component in folders.iter().chain(std::iter::once(&name)) {
            validate_path_component(component)?;
        }
        Ok(Self { folders, name })
    }

    /// Parse a `/`-separated path such as `c/d.jpg`.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        let mut parts: Vec<String> = path.split('/').map(str::to_string).collect();
        let name = parts.pop().unwrap_or_default();
        Self::new(parts, name)
    }

    /// Same folders, same base name, new extension.
    pub fn with_extension(&self, extension: &str) -> Self {
        let stem = match self.name.rfind('.') {
            Some(dot) => &self.name[..dot],
            None => self.name.as_str(),
        };
        Self {
            folders: self.folders.clone(),
            name: format!("{stem}.{extension}"),
        }
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rfind('.')
            .map(|dot| self.name[dot + 1..].to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.folders
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for folder in &self.folders {
            write!(f, "{folder}/")?;
        }
        f.write_str(&self.name)
    }
}

/// A payload unit, or directory marker, inside a representation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub package_id: PackageId,
    pub representation_id: RepresentationId,
    pub path: RelativePath,
    pub is_directory: bool,
    pub size: u64,
    /// Opaque pointer into the storage gateway.
    pub content_locator: String,
    /// Hex BLAKE3 digest of the payload; `None` for directories.
    pub digest: Option<String>,
}

impl File {
    /// The file id: the final path component.
    pub fn id(&self) -> &str {
        &self.path.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_parse_and_display() {
        let p = RelativePath::parse("c/d.jpg").unwrap();
        assert_eq!(p.folders, vec!["c".to_string()]);
        assert_eq!(p.name, "d.jpg");
        assert_eq!(p.to_string(), "c/d.jpg");
        assert_eq!(RelativePath::parse("a.jpg").unwrap().folders.len(), 0);
    }

    #[test]
    fn relative_path_rejects_traversal() {
        assert!(RelativePath::parse("../etc/passwd").is_err());
        assert!(RelativePath::parse("a/./b").is_err());
        assert!(RelativePath::parse("a//b").is_err());
        assert!(RelativePath::new(vec![], "").is_err());
    }

    #[test]
    fn extension_swap() {
        let p = RelativePath::parse("c/d.jpg").unwrap();
        assert_eq!(p.with_extension("tiff").to_string(), "c/d.tiff");
        let tar = RelativePath::parse("archive.tar.gz").unwrap();
        assert_eq!(tar.with_extension("zip").name, "archive.tar.zip");
        let bare = RelativePath::parse("README").unwrap();
        assert_eq!(bare.with_extension("pdf").name, "README.pdf");
        assert_eq!(RelativePath::parse("X.JPG").unwrap().extension().as_deref(), Some("jpg"));
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn permissions_grant() {
        let mut perms = Permissions::default();
        assert!(perms.is_empty());
        perms.grant(PermissionType::Read, "archivists");
        perms.grant(PermissionType::Read, "admin");
        let readers: Vec<_> = perms.principals(PermissionType::Read).collect();
        assert_eq!(readers, vec!["admin", "archivists"]);
        assert!(perms.principals(PermissionType::Delete).next().is_none());
    }

    #[test]
    fn representation_files_are_not_persisted() {
        let mut rep = Representation::new(
            PackageId::new("p").unwrap(),
            RepresentationId::new("r").unwrap(),
            true,
        );
        rep.files.push(RelativePath::parse("a.txt").unwrap());
        let json = serde_json::to_string(&rep).unwrap();
        let back: Representation = serde_json::from_str(&json).unwrap();
        assert!(back.files.is_empty());
        assert!(back.original);
    }
}
