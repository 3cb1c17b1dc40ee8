use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use arca_model::ModelService;
use arca_types::{JobId, Package, ReportItem};

use crate::error::PluginResult;
use crate::parameter::PluginParameter;

/// What a plugin consumes and produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Reads packages and derives new content inside them.
    PackageToPackage,
    /// Turns a transferred submission into a package.
    Ingest,
    Misc,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PackageToPackage => "package_to_package",
            Self::Ingest => "ingest",
            Self::Misc => "misc",
        };
        f.write_str(s)
    }
}

/// Static description of a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub plugin_type: PluginType,
}

/// An object a plugin can process.
pub trait PluginItem: Send + Sync {
    /// Identifier recorded on the item's report entry.
    fn item_id(&self) -> String;
}

impl PluginItem for Package {
    fn item_id(&self) -> String {
        self.id.to_string()
    }
}

/// A submission staged on the local filesystem, waiting for ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferredResource {
    pub id: String,
    pub path: PathBuf,
}

impl TransferredResource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

impl PluginItem for TransferredResource {
    fn item_id(&self) -> String {
        self.id.clone()
    }
}

/// Services available to a plugin while its job runs.
#[derive(Clone)]
pub struct PluginContext {
    pub model: Arc<ModelService>,
    pub job_id: JobId,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// A unit of work applied to a batch of items.
///
/// A plugin instance is stateful for the duration of one job: parameters
/// are set once, then the runner calls `before_execute`, `execute_item` for
/// every input, and `after_execute`. Use [`clone_me`](Plugin::clone_me) to
/// get a fresh instance for another job.
pub trait Plugin<T: PluginItem>: Send {
    fn info(&self) -> PluginInfo;

    /// Declared parameter schema.
    fn parameters(&self) -> Vec<PluginParameter>;

    /// Validate and adopt parameter values. Unknown keys are ignored.
    fn set_parameter_values(&mut self, values: &BTreeMap<String, String>) -> PluginResult<()>;

    /// The effective values, defaults included.
    fn parameter_values(&self) -> BTreeMap<String, String>;

    /// Runs once before the batch. Returned items are added to the report.
    fn before_execute(&mut self, _ctx: &PluginContext) -> PluginResult<Option<Vec<ReportItem>>> {
        Ok(None)
    }

    /// Process one item, recording its outcome on `report`.
    ///
    /// Returning `Ok` without moving `report` to a terminal state counts as
    /// success. Returning `Err` marks the item failed.
    fn execute_item(&mut self, ctx: &PluginContext, item: &T, report: &mut ReportItem) -> PluginResult<()>;

    /// Runs once after the batch. Returned items are added to the report.
    fn after_execute(&mut self, _ctx: &PluginContext) -> PluginResult<Option<Vec<ReportItem>>> {
        Ok(None)
    }

    /// A fresh, unparameterized instance of the same plugin.
    fn clone_me(&self) -> Box<dyn Plugin<T>>;
}
