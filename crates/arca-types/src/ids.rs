use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::validation::validate_id;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a caller-supplied id after validating it.
            pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
                let id = id.into();
                validate_id(&id)?;
                Ok(Self(id))
            }

            /// Generate a fresh, time-ordered id (UUID v7).
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Globally unique, immutable identifier of a [`Package`](crate::Package).
    PackageId
);
string_id!(
    /// Identifier of a [`Representation`](crate::Representation), unique within its package.
    RepresentationId
);
string_id!(
    /// Identifier of a plugin execution job.
    JobId
);
string_id!(
    /// Identifier of a preservation event or log entry.
    EventId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = PackageId::generate();
        let b = PackageId::generate();
        assert_ne!(a, b);
        assert!(PackageId::new(a.as_str()).is_ok());
    }

    #[test]
    fn rejects_slashes() {
        assert!(RepresentationId::new("a/b").is_err());
        assert!(RepresentationId::new("").is_err());
        assert!(RepresentationId::new("rep-1").is_ok());
    }

    #[test]
    fn serializes_transparently() {
        let id = JobId::new("job-7").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-7\"");
        let back: JobId = serde_json::from_str("\"job-7\"").unwrap();
        assert_eq!(back, id);
    }
}
