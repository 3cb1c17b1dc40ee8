use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of indexed document. Each kind is a separate collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Package,
    Representation,
    File,
    PreservationEvent,
    ActionLog,
    Job,
    JobReport,
}

impl DocType {
    pub const ALL: [DocType; 7] = [
        DocType::Package,
        DocType::Representation,
        DocType::File,
        DocType::PreservationEvent,
        DocType::ActionLog,
        DocType::Job,
        DocType::JobReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Representation => "representation",
            Self::File => "file",
            Self::PreservationEvent => "preservation_event",
            Self::ActionLog => "action_log",
            Self::Job => "job",
            Self::JobReport => "job_report",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field names shared by projections and queries.
pub mod fields {
    pub const ID: &str = "id";
    pub const PARENT_ID: &str = "parentId";
    pub const TITLE: &str = "title";
    pub const ACTIVE: &str = "active";
    /// Ancestor package ids, nearest first; `null` marks an unresolvable one.
    pub const ANCESTORS: &str = "ancestors";
    /// Titles from the root down to the package itself.
    pub const TITLE_PATH: &str = "titlePath";
    pub const PERMISSIONS: &str = "permissions";
    pub const REPRESENTATION_COUNT: &str = "numberOfRepresentations";
    pub const METADATA_IDS: &str = "descriptiveMetadataIds";
    pub const METADATA_TYPES: &str = "metadataTypes";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";

    pub const PACKAGE_ID: &str = "packageId";
    pub const REPRESENTATION_ID: &str = "representationId";
    pub const ORIGINAL: &str = "original";
    pub const FILE_COUNT: &str = "numberOfFiles";
    pub const TOTAL_SIZE: &str = "totalSize";

    pub const PATH: &str = "path";
    pub const NAME: &str = "name";
    pub const FOLDERS: &str = "folders";
    pub const EXTENSION: &str = "extension";
    pub const IS_DIRECTORY: &str = "isDirectory";
    pub const SIZE: &str = "size";
    pub const DIGEST: &str = "digest";

    pub const EVENT_TYPE: &str = "eventType";
    pub const OUTCOME: &str = "outcome";
    pub const AFFECTED_FILES: &str = "affectedFileIds";
    pub const AGENT: &str = "agent";
    pub const DETAILS: &str = "details";

    pub const DATETIME: &str = "datetime";
    pub const ACTION_COMPONENT: &str = "actionComponent";
    pub const ACTION_METHOD: &str = "actionMethod";
    pub const RELATED_OBJECT_ID: &str = "relatedObjectId";
    pub const USERNAME: &str = "username";
    pub const DURATION_MS: &str = "durationMs";
    pub const PARAMETERS: &str = "parameters";

    pub const JOB_ID: &str = "jobId";
    pub const PLUGIN_ID: &str = "pluginId";
    pub const STATE: &str = "state";
    pub const ITEM_ID: &str = "itemId";
    pub const ATTRIBUTES: &str = "attributes";
}

/// Denormalized, queryable projection of a canonical object.
///
/// Derived and rebuildable; never authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_type: DocType,
    pub id: String,
    pub fields: BTreeMap<String, Value>,
}

impl IndexDocument {
    pub fn new(doc_type: DocType, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut values = BTreeMap::new();
        values.insert(fields::ID.to_string(), Value::String(id.clone()));
        Self {
            doc_type,
            id,
            fields: values,
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }
}

/// Render a timestamp so that lexical order equals chronological order.
pub fn timestamp(t: &DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true))
}
