use std::fmt;

use arca_types::validation::validate_id;

use crate::error::{StoreError, StoreResult};

/// Hierarchical address of a resource inside the storage gateway.
///
/// The first component names the container (`aip`, `actionlog`, `job`, ...).
/// Every component is validated as a single path segment, so a path can never
/// point outside its container.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    pub fn from_components<I, S>(components: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Err(StoreError::InvalidPath("empty path".into()));
        }
        for c in &components {
            validate_id(c).map_err(|e| StoreError::InvalidPath(e.to_string()))?;
        }
        Ok(Self { components })
    }

    /// Parse a `/`-separated path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        Self::from_components(path.split('/'))
    }

    /// Append one component.
    pub fn child(&self, component: impl Into<String>) -> StoreResult<Self> {
        let component = component.into();
        validate_id(&component).map_err(|e| StoreError::InvalidPath(e.to_string()))?;
        let mut components = self.components.clone();
        components.push(component);
        Ok(Self { components })
    }

    /// Append several components.
    pub fn join<I, S>(&self, rest: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        rest.into_iter().try_fold(self.clone(), |path, c| path.child(c))
    }

    pub fn container(&self) -> &str {
        &self.components[0]
    }

    pub fn name(&self) -> &str {
        self.components
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.components.len() < 2 {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_under(&self, ancestor: &StoragePath) -> bool {
        self.components.len() > ancestor.components.len()
            && self.components.starts_with(&ancestor.components)
    }

    /// Components of `self` below `ancestor`, if `self` lies under it.
    pub fn relative_to(&self, ancestor: &StoragePath) -> Option<&[String]> {
        self.is_under(ancestor)
            .then(|| &self.components[ancestor.components.len()..])
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

impl fmt::Debug for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePath({self})")
    }
}
