use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::JobId;

/// Attribute key holding the textual outcome of an item.
pub const ATTR_OUTCOME: &str = "outcome";
/// Attribute key holding the error message or other outcome details.
pub const ATTR_OUTCOME_DETAILS: &str = "outcome_details";

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_PARTIAL_SUCCESS: &str = "partial_success";

/// Processing state of a single report item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    /// Transient: the item is being processed.
    Pending,
    Ok,
    Failure,
    PartialSuccess,
}

impl PluginState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn outcome_label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => OUTCOME_SUCCESS,
            Self::Failure => OUTCOME_FAILURE,
            Self::PartialSuccess => OUTCOME_PARTIAL_SUCCESS,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ok => "OK",
            Self::Failure => "FAILURE",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
        };
        f.write_str(s)
    }
}

/// Outcome record for one input object of a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub item_id: String,
    pub plugin_id: String,
    pub state: PluginState,
    pub attributes: BTreeMap<String, String>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl ReportItem {
    pub fn pending(item_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.into(),
            plugin_id: plugin_id.into(),
            state: PluginState::Pending,
            attributes: BTreeMap::new(),
            date_created: now,
            date_updated: now,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Move the item to a terminal state and stamp its outcome attribute.
    pub fn finish(&mut self, state: PluginState) {
        self.state = state;
        self.attributes
            .insert(ATTR_OUTCOME.to_string(), state.outcome_label().to_string());
        self.date_updated = Utc::now();
    }

    /// Mark the item failed, capturing `details` as the outcome details.
    pub fn fail(&mut self, details: impl Into<String>) {
        self.attributes
            .insert(ATTR_OUTCOME_DETAILS.to_string(), details.into());
        self.finish(PluginState::Failure);
    }
}

/// Per-job collection of report items.
///
/// Append-only while the job runs; sealing makes it immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub job_id: JobId,
    pub plugin_id: String,
    pub items: Vec<ReportItem>,
    pub sealed: bool,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn new(job_id: JobId, plugin_id: impl Into<String>) -> Self {
        Self {
            job_id,
            plugin_id: plugin_id.into(),
            items: Vec::new(),
            sealed: false,
            created_at: Utc::now(),
            sealed_at: None,
        }
    }

    pub fn add_item(&mut self, item: ReportItem) -> Result<(), TypeError> {
        if self.sealed {
            return Err(TypeError::ReportSealed(self.job_id.to_string()));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn seal(&mut self) {
        if !self.sealed {
            self.sealed = true;
            self.sealed_at = Some(Utc::now());
        }
    }

    pub fn item(&self, item_id: &str) -> Option<&ReportItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn count(&self, state: PluginState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }
}

/// Lifecycle of a plugin execution job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
}

/// One plugin execution over an input batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub plugin_id: String,
    pub parameters: BTreeMap<String, String>,
    pub state: JobState,
    pub source_objects: usize,
    pub processed_ok: usize,
    pub processed_partial: usize,
    pub processed_failed: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(plugin_id: impl Into<String>, parameters: BTreeMap<String, String>, source_objects: usize) -> Self {
        Self {
            id: JobId::generate(),
            plugin_id: plugin_id.into(),
            parameters,
            state: JobState::Created,
            source_objects,
            processed_ok: 0,
            processed_partial: 0,
            processed_failed: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Count a finished item.
    pub fn record(&mut self, state: PluginState) {
        match state {
            PluginState::Ok => self.processed_ok += 1,
            PluginState::PartialSuccess => self.processed_partial += 1,
            PluginState::Failure => self.processed_failed += 1,
            PluginState::Pending => {}
        }
    }

    pub fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}
