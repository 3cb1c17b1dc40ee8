use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use arca_model::ModelService;
use arca_types::{Job, JobState, LogEntry, PluginState, Report, ReportItem};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginContext, PluginItem};

/// Attribute carrying the id of the input an item was created for.
///
/// Plugins may rename `item_id` (ingest sets it to the new package id);
/// this attribute keeps the link to the input.
pub const ATTR_SOURCE_OBJECT_ID: &str = "sourceObjectId";

/// Final state of a job together with its sealed report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: Job,
    pub report: Report,
}

/// Drives plugins through their lifecycle and keeps the job record and
/// its report persisted as the batch progresses.
///
/// Items are processed one at a time. A failure or panic on one item marks
/// that item FAILURE and processing moves on; every input ends up in the
/// report exactly once.
pub struct PluginRunner {
    model: Arc<ModelService>,
}

impl PluginRunner {
    pub fn new(model: Arc<ModelService>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<ModelService> {
        &self.model
    }

    /// Run `plugin` over `items` as one job.
    ///
    /// Only parameter validation and persistence of the final job state
    /// surface as errors; everything else is recorded on the report.
    pub fn run<T: PluginItem>(
        &self,
        plugin: &mut dyn Plugin<T>,
        parameters: &BTreeMap<String, String>,
        items: &[T],
    ) -> PluginResult<JobOutcome> {
        let started = Instant::now();
        plugin.set_parameter_values(parameters)?;
        let info = plugin.info();

        let mut job = Job::new(info.id.clone(), plugin.parameter_values(), items.len());
        job.state = JobState::Running;
        self.model.create_or_update_job(&job)?;
        let mut report = Report::new(job.id.clone(), info.id.clone());
        self.model.create_or_update_job_report(&report)?;
        info!(job = %job.id, plugin = %info.id, items = items.len(), "job started");

        let ctx = PluginContext {
            model: self.model.clone(),
            job_id: job.id.clone(),
        };

        let mut failed = false;
        match guarded(|| plugin.before_execute(&ctx)) {
            Ok(extra) => self.append_all(&mut report, extra.unwrap_or_default())?,
            Err(reason) => {
                error!(job = %job.id, plugin = %info.id, %reason, "before_execute failed; failing every item");
                for item in items {
                    let mut entry = pending_for(item, &info.id);
                    entry.fail(format!("job setup failed: {reason}"));
                    job.record(entry.state);
                    self.append(&mut report, entry)?;
                }
                return self.finish(job, report, JobState::Failed, started);
            }
        }

        for item in items {
            let mut entry = pending_for(item, &info.id);
            match guarded(|| plugin.execute_item(&ctx, item, &mut entry)) {
                Ok(()) if !entry.state.is_terminal() => entry.finish(PluginState::Ok),
                Ok(()) => {}
                Err(reason) => {
                    warn!(job = %job.id, item = %item.item_id(), %reason, "item failed");
                    entry.fail(reason);
                }
            }
            debug!(job = %job.id, item = %entry.item_id, state = %entry.state, "item processed");
            job.record(entry.state);
            self.append(&mut report, entry)?;
        }

        match guarded(|| plugin.after_execute(&ctx)) {
            Ok(extra) => self.append_all(&mut report, extra.unwrap_or_default())?,
            Err(reason) => {
                error!(job = %job.id, plugin = %info.id, %reason, "after_execute failed");
                failed = true;
            }
        }

        let state = if failed { JobState::Failed } else { JobState::Completed };
        self.finish(job, report, state, started)
    }

    fn append(&self, report: &mut Report, entry: ReportItem) -> PluginResult<()> {
        report.add_item(entry)?;
        if let Err(e) = self.model.create_or_update_job_report(report) {
            error!(job = %report.job_id, error = %e, "failed to persist report update");
        }
        Ok(())
    }

    fn append_all(&self, report: &mut Report, entries: Vec<ReportItem>) -> PluginResult<()> {
        for entry in entries {
            self.append(report, entry)?;
        }
        Ok(())
    }

    fn finish(
        &self,
        mut job: Job,
        mut report: Report,
        state: JobState,
        started: Instant,
    ) -> PluginResult<JobOutcome> {
        job.finish(state);
        report.seal();
        self.model.create_or_update_job_report(&report)?;
        self.model.create_or_update_job(&job)?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut entry = LogEntry::new("plugin_runner", job.plugin_id.clone());
        entry.related_object_id = Some(job.id.to_string());
        entry.parameters = job.parameters.clone();
        entry.duration_ms = duration_ms;
        if let Err(e) = self.model.add_log_entry(entry) {
            warn!(job = %job.id, error = %e, "failed to record job in action log");
        }

        info!(
            job = %job.id,
            state = ?job.state,
            ok = job.processed_ok,
            partial = job.processed_partial,
            failed = job.processed_failed,
            duration_ms,
            "job finished"
        );
        Ok(JobOutcome { job, report })
    }
}

impl std::fmt::Debug for PluginRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRunner").finish_non_exhaustive()
    }
}

fn pending_for<T: PluginItem>(item: &T, plugin_id: &str) -> ReportItem {
    let id = item.item_id();
    ReportItem::pending(id.clone(), plugin_id).with_attribute(ATTR_SOURCE_OBJECT_ID, id)
}

/// Run a plugin hook, turning both errors and panics into a message.
fn guarded<R>(f: impl FnOnce() -> PluginResult<R>) -> Result<R, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(describe(&e)),
        Err(payload) => Err(format!("plugin panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn describe(e: &PluginError) -> String {
    format!("{} ({})", e, e.kind())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
