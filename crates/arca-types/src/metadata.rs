use serde::{Deserialize, Serialize};

use crate::ids::PackageId;

/// Type recorded for descriptive metadata submitted without one.
pub const DEFAULT_METADATA_TYPE: &str = "plain";

/// Descriptive metadata attached to a package, one entry per id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptiveMetadata {
    pub package_id: PackageId,
    pub id: String,
    pub metadata_type: String,
    pub size: u64,
    pub content_locator: String,
}

impl DescriptiveMetadata {
    /// Normalize an optional declared type, falling back to
    /// [`DEFAULT_METADATA_TYPE`].
    pub fn type_or_default(declared: Option<&str>) -> String {
        match declared.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_METADATA_TYPE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_type() {
        assert_eq!(DescriptiveMetadata::type_or_default(None), "plain");
        assert_eq!(DescriptiveMetadata::type_or_default(Some("  ")), "plain");
        assert_eq!(DescriptiveMetadata::type_or_default(Some("ead")), "ead");
    }
}
