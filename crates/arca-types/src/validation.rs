//! Pure validation rules for the object model.
//!
//! Nothing here performs I/O. Rules that need to look at other objects
//! (parent links, sibling ids) take the lookup as a closure or iterator so
//! the model service can feed them from canonical storage.

use std::collections::HashSet;

use crate::error::TypeError;
use crate::ids::PackageId;

/// Check that an identifier can be used as a single storage path component.
pub fn validate_id(id: &str) -> Result<(), TypeError> {
    let reason = if id.is_empty() {
        Some("empty")
    } else if id == "." || id == ".." {
        Some("relative path component")
    } else if id.contains('/') || id.contains('\\') {
        Some("contains a path separator")
    } else if id.chars().any(char::is_control) {
        Some("contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TypeError::InvalidId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Check that a folder or file name cannot escape its representation root.
pub fn validate_path_component(component: &str) -> Result<(), TypeError> {
    if component == ".." || component == "." || component.contains('/') || component.contains('\\')
    {
        return Err(TypeError::PathTraversal(component.to_string()));
    }
    validate_id(component)
}

/// Reject `candidate` if it already appears among `existing`.
pub fn ensure_unique<'a, I>(scope: &'static str, existing: I, candidate: &str) -> Result<(), TypeError>
where
    I: IntoIterator<Item = &'a str>,
{
    if existing.into_iter().any(|id| id == candidate) {
        return Err(TypeError::Duplicate {
            scope,
            id: candidate.to_string(),
        });
    }
    Ok(())
}

/// One step of an [`AncestorWalk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AncestorStep {
    /// The ancestor exists.
    Found(PackageId),
    /// The ancestor is referenced but could not be resolved.
    Dangling(PackageId),
}

impl AncestorStep {
    pub fn id(&self) -> &PackageId {
        match self {
            Self::Found(id) | Self::Dangling(id) => id,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Lazily follows `parent_id` links upwards from a package.
///
/// The walk ends at a root, after a dangling reference, or just before a
/// package would be visited a second time. The resolver returns `None` when
/// a package does not exist and `Some(parent)` otherwise.
pub struct AncestorWalk<F> {
    next: Option<PackageId>,
    seen: HashSet<PackageId>,
    cycle_at: Option<PackageId>,
    resolve: F,
}

impl<F> AncestorWalk<F>
where
    F: FnMut(&PackageId) -> Option<Option<PackageId>>,
{
    /// Start walking from `origin`, whose parent link is `parent`.
    pub fn new(origin: &PackageId, parent: Option<PackageId>, resolve: F) -> Self {
        let mut seen = HashSet::new();
        seen.insert(origin.clone());
        Self {
            next: parent,
            seen,
            cycle_at: None,
            resolve,
        }
    }

    /// The package at which a cycle was detected, if the walk hit one.
    pub fn cycle_at(&self) -> Option<&PackageId> {
        self.cycle_at.as_ref()
    }
}

impl<F> Iterator for AncestorWalk<F>
where
    F: FnMut(&PackageId) -> Option<Option<PackageId>>,
{
    type Item = AncestorStep;

    fn next(&mut self) -> Option<AncestorStep> {
        let current = self.next.take()?;
        if !self.seen.insert(current.clone()) {
            self.cycle_at = Some(current);
            return None;
        }
        match (self.resolve)(&current) {
            Some(parent) => {
                self.next = parent;
                Some(AncestorStep::Found(current))
            }
            None => Some(AncestorStep::Dangling(current)),
        }
    }
}

/// Reject a parent link that would make `child` its own ancestor.
///
/// Pre-existing cycles that do not pass through `child` terminate the walk
/// without an error; they are the ancestor resolver's problem, not this
/// link's.
pub fn check_parent_link<F>(
    child: &PackageId,
    parent: Option<&PackageId>,
    resolve: F,
) -> Result<(), TypeError>
where
    F: FnMut(&PackageId) -> Option<Option<PackageId>>,
{
    let Some(parent) = parent else {
        return Ok(());
    };
    let mut walk = AncestorWalk::new(child, Some(parent.clone()), resolve);
    for _ in walk.by_ref() {}
    if walk.cycle_at() == Some(child) {
        return Err(TypeError::Cycle {
            child: child.to_string(),
            parent: parent.to_string(),
        });
    }
    Ok(())
}
