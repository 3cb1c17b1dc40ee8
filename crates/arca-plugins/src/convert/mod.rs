//! Format migration: derive a new representation by converting files with
//! an external tool.

pub mod tool;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use arca_model::{ModelError, ModelResult};
use arca_types::job::ATTR_OUTCOME_DETAILS;
use arca_types::{
    EventId, EventOutcome, File, Package, PackageId, PluginState, PreservationEvent,
    RelativePath, ReportItem, Representation, RepresentationId,
};

use crate::error::{PluginError, PluginResult};
use crate::parameter::{ParameterKind, ParameterValues, PluginParameter};
use crate::plugin::{Plugin, PluginContext, PluginInfo, PluginType};

pub use tool::{render_command, CommandTool, ConversionTool, ToolConfig};

pub const PARAM_INPUT_FORMAT: &str = "inputFormat";
pub const PARAM_OUTPUT_FORMAT: &str = "outputFormat";
pub const PARAM_MAX_KBYTES: &str = "maxKbytes";
pub const PARAM_PARTIAL_SUCCESS: &str = "hasPartialSuccessOnOutcome";
pub const PARAM_COMMAND_ARGUMENTS: &str = "commandArguments";

pub const DEFAULT_MAX_KBYTES: u64 = 20_000;

/// Event type recorded for every converted representation.
pub const MIGRATION_EVENT_TYPE: &str = "migration";

/// Details keys of the migration event.
pub const DETAIL_NEW_REPRESENTATION: &str = "new_representation_id";
pub const DETAIL_SOURCE_REPRESENTATION: &str = "source_representation_id";
pub const DETAIL_OUTPUT_FORMAT: &str = "output_format";

/// Result of converting one source representation.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RepresentationRun {
    new_representation: Option<RepresentationId>,
    /// Relative paths of the source files that were converted.
    altered: Vec<String>,
    outcome: EventOutcome,
}

/// Converts the files of every representation of a package into a new,
/// non-original representation.
///
/// Only non-directory files whose extension matches the input formats and
/// whose size is within `maxKbytes` are converted; everything else is left
/// out of the derived representation.
pub struct ConvertPlugin {
    tool: Arc<dyn ConversionTool>,
    default_max_kbytes: u64,
    default_partial_success: bool,
    values: ParameterValues,
}

impl ConvertPlugin {
    pub fn new(tool: Arc<dyn ConversionTool>) -> Self {
        Self {
            tool,
            default_max_kbytes: DEFAULT_MAX_KBYTES,
            default_partial_success: true,
            values: ParameterValues::default(),
        }
    }

    /// Override the defaults used when a job leaves them unset.
    pub fn with_defaults(mut self, max_kbytes: u64, has_partial_success_on_outcome: bool) -> Self {
        self.default_max_kbytes = max_kbytes;
        self.default_partial_success = has_partial_success_on_outcome;
        self
    }

    fn output_format(&self) -> &str {
        self.values.get(PARAM_OUTPUT_FORMAT).unwrap_or_default()
    }

    fn max_bytes(&self) -> u64 {
        self.values
            .get_u64(PARAM_MAX_KBYTES)
            .unwrap_or(self.default_max_kbytes)
            .saturating_mul(1024)
    }

    fn is_candidate(&self, file: &File) -> bool {
        if file.is_directory || file.size > self.max_bytes() {
            return false;
        }
        let Some(extension) = file.path.extension() else {
            return false;
        };
        match self.values.get(PARAM_INPUT_FORMAT) {
            Some(format) => format.eq_ignore_ascii_case(&extension),
            None => self.tool.input_formats().iter().any(|f| f.eq_ignore_ascii_case(&extension)),
        }
    }

    /// Outcome a failed file contributes to its representation.
    fn file_failure(&self) -> EventOutcome {
        if self.values.get_bool(PARAM_PARTIAL_SUCCESS) {
            EventOutcome::PartialSuccess
        } else {
            EventOutcome::Failure
        }
    }

    fn convert_representation(
        &self,
        ctx: &PluginContext,
        package_id: &PackageId,
        source: &Representation,
    ) -> RepresentationRun {
        let mut run = RepresentationRun {
            new_representation: None,
            altered: Vec::new(),
            outcome: EventOutcome::Success,
        };

        let files = match ctx
            .model
            .list_all_files(package_id, &source.id)
            .and_then(|files| files.collect::<ModelResult<Vec<File>>>())
        {
            Ok(files) => files,
            Err(e) => {
                error!(package = %package_id, representation = %source.id, error = %e, "cannot list representation files");
                run.outcome = EventOutcome::Failure;
                return run;
            }
        };

        let mut produced = HashSet::new();
        for file in files.iter().filter(|f| self.is_candidate(f)) {
            let destination = file.path.with_extension(self.output_format());
            if produced.contains(&destination) {
                warn!(
                    package = %package_id,
                    file = %file.path,
                    destination = %destination,
                    "another file already converted to this name; skipped"
                );
                run.outcome = run.outcome.degrade(self.file_failure());
                continue;
            }
            match self.convert_file(ctx, file, &destination, &mut run.new_representation) {
                Ok(()) => {
                    run.altered.push(file.path.to_string());
                    produced.insert(destination);
                }
                Err(PluginError::Command(e)) => {
                    warn!(package = %package_id, file = %file.path, error = %e, "conversion failed");
                    run.outcome = run.outcome.degrade(self.file_failure());
                }
                Err(e) => {
                    error!(package = %package_id, file = %file.path, error = %e, "conversion aborted");
                    run.outcome = EventOutcome::Failure;
                    break;
                }
            }
        }
        run
    }

    fn convert_file(
        &self,
        ctx: &PluginContext,
        file: &File,
        destination: &RelativePath,
        new_representation: &mut Option<RepresentationId>,
    ) -> PluginResult<()> {
        let mut content = ctx.model.reader().retrieve_file_content(file)?.content;
        let input_format = file.path.extension().unwrap_or_default();
        let arguments = self.values.get(PARAM_COMMAND_ARGUMENTS).unwrap_or_default();
        let converted =
            self.tool
                .convert(&mut content, &input_format, self.output_format(), arguments)?;

        let target = match new_representation {
            Some(id) => id.clone(),
            None => {
                let id = RepresentationId::generate();
                ctx.model.create_representation(&file.package_id, id.clone(), false)?;
                debug!(package = %file.package_id, representation = %id, "derived representation created");
                *new_representation = Some(id.clone());
                id
            }
        };

        for stale in [&file.path, destination] {
            match ctx.model.delete_file(&file.package_id, &target, stale) {
                Ok(()) | Err(ModelError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let mut payload = converted.reopen()?;
        ctx.model
            .create_file(&file.package_id, &target, destination, &mut payload)?;
        Ok(())
    }

    fn record_event(
        &self,
        ctx: &PluginContext,
        package_id: &PackageId,
        source: &RepresentationId,
        run: &RepresentationRun,
    ) -> PluginResult<()> {
        let mut details = BTreeMap::new();
        details.insert(DETAIL_SOURCE_REPRESENTATION.to_string(), source.to_string());
        details.insert(
            DETAIL_NEW_REPRESENTATION.to_string(),
            run.new_representation
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        );
        details.insert(DETAIL_OUTPUT_FORMAT.to_string(), self.output_format().to_string());

        ctx.model.create_preservation_event(PreservationEvent {
            id: EventId::generate(),
            package_id: package_id.clone(),
            representation_id: Some(source.clone()),
            event_type: MIGRATION_EVENT_TYPE.to_string(),
            outcome: run.outcome,
            affected_file_ids: run.altered.clone(),
            details,
            timestamp: Utc::now(),
            agent: self.info().id,
        })?;
        Ok(())
    }
}

impl Plugin<Package> for ConvertPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: format!("convert-{}", self.tool.name()),
            name: format!("Format conversion ({})", self.tool.name()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Converts representation files into a new representation".to_string(),
            plugin_type: PluginType::PackageToPackage,
        }
    }

    fn parameters(&self) -> Vec<PluginParameter> {
        vec![
            PluginParameter::new(PARAM_INPUT_FORMAT, ParameterKind::String)
                .described("only convert files with this extension"),
            PluginParameter::new(PARAM_OUTPUT_FORMAT, ParameterKind::String)
                .mandatory()
                .described("extension of the converted files"),
            PluginParameter::new(PARAM_MAX_KBYTES, ParameterKind::Count)
                .with_default(self.default_max_kbytes.to_string()),
            PluginParameter::new(PARAM_PARTIAL_SUCCESS, ParameterKind::Boolean)
                .with_default(self.default_partial_success.to_string())
                .described("a failed file degrades to partial success instead of failure"),
            PluginParameter::new(PARAM_COMMAND_ARGUMENTS, ParameterKind::String),
        ]
    }

    fn set_parameter_values(&mut self, values: &BTreeMap<String, String>) -> PluginResult<()> {
        let resolved = ParameterValues::resolve(&self.parameters(), values)?;
        if resolved.get(PARAM_OUTPUT_FORMAT).map_or(true, |f| f.trim().is_empty()) {
            return Err(PluginError::InvalidParameter(format!(
                "{PARAM_OUTPUT_FORMAT} must not be empty"
            )));
        }
        self.values = resolved;
        Ok(())
    }

    fn parameter_values(&self) -> BTreeMap<String, String> {
        self.values.as_map().clone()
    }

    fn execute_item(&mut self, ctx: &PluginContext, package: &Package, report: &mut ReportItem) -> PluginResult<()> {
        // Snapshot first: representations created below must not be converted again.
        let package = ctx.model.retrieve_package(&package.id)?;
        let mut outcome = EventOutcome::Success;
        let mut created = Vec::new();
        let mut failed = Vec::new();

        for source in &package.representations {
            let run = self.convert_representation(ctx, &package.id, source);
            self.record_event(ctx, &package.id, &source.id, &run)?;
            info!(
                package = %package.id,
                representation = %source.id,
                converted = run.altered.len(),
                outcome = %run.outcome,
                "representation converted"
            );
            if run.outcome != EventOutcome::Success {
                failed.push(source.id.to_string());
            }
            created.extend(run.new_representation.map(|id| id.to_string()));
            outcome = outcome.degrade(run.outcome);
        }

        if !created.is_empty() {
            report.add_attribute("newRepresentations", created.join(","));
        }
        let state = match outcome {
            EventOutcome::Success => PluginState::Ok,
            EventOutcome::PartialSuccess => PluginState::PartialSuccess,
            EventOutcome::Failure => PluginState::Failure,
        };
        if state != PluginState::Ok {
            report.add_attribute(
                ATTR_OUTCOME_DETAILS,
                format!("conversion incomplete for representations {}", failed.join(",")),
            );
        }
        report.finish(state);
        Ok(())
    }

    fn clone_me(&self) -> Box<dyn Plugin<Package>> {
        Box::new(
            ConvertPlugin::new(self.tool.clone())
                .with_defaults(self.default_max_kbytes, self.default_partial_success),
        )
    }
}

impl std::fmt::Debug for ConvertPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvertPlugin")
            .field("tool", &self.tool.name())
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::Mutex;

    use arca_model::{ModelService, NewPackage};
    use arca_store::InMemoryStorage;
    use arca_types::RelativePath;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::error::CommandError;
    use crate::runner::PluginRunner;

    /// Upper-cases payloads; fails on payloads starting with "fail".
    struct FakeTool {
        formats: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTool {
        fn new(formats: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                formats: formats.iter().map(|f| f.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ConversionTool for FakeTool {
        fn name(&self) -> &str {
            "fake"
        }

        fn input_formats(&self) -> &[String] {
            &self.formats
        }

        fn convert(
            &self,
            input: &mut dyn Read,
            input_format: &str,
            output_format: &str,
            _arguments: &str,
        ) -> Result<NamedTempFile, CommandError> {
            let mut data = Vec::new();
            input.read_to_end(&mut data)?;
            self.calls
                .lock()
                .unwrap()
                .push(format!("{input_format}->{output_format}"));
            if data.starts_with(b"fail") {
                return Err(CommandError::Failed {
                    command: "fake".into(),
                    status: "exit status: 1".into(),
                    stderr: "bad input".into(),
                });
            }
            let mut out = NamedTempFile::new()?;
            out.write_all(&data.to_ascii_uppercase())?;
            Ok(out)
        }
    }

    fn pid(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn package_with(model: &ModelService, files: &[(&str, &[u8])]) -> Package {
        let id = pid("p1");
        model
            .create_package(NewPackage {
                id: Some(id.clone()),
                ..NewPackage::default()
            })
            .unwrap();
        let rep = RepresentationId::new("r1").unwrap();
        model.create_representation(&id, rep.clone(), true).unwrap();
        for (path, data) in files {
            model
                .create_file(&id, &rep, &RelativePath::parse(path).unwrap(), &mut &data[..])
                .unwrap();
        }
        model.retrieve_package(&id).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn derived(model: &ModelService, package: &PackageId) -> Representation {
        model
            .retrieve_package(package)
            .unwrap()
            .representations
            .into_iter()
            .find(|r| !r.original)
            .expect("derived representation")
    }

    #[test]
    fn converts_only_candidates() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let package = package_with(&model, &[("a.jpg", b"aaa"), ("b.txt", b"bbb"), ("c/d.JPG", b"ddd")]);
        let tool = FakeTool::new(&["jpg"]);

        let runner = PluginRunner::new(model.clone());
        let outcome = runner
            .run(
                &mut ConvertPlugin::new(tool.clone()),
                &params(&[(PARAM_OUTPUT_FORMAT, "tiff")]),
                &[package.clone()],
            )
            .unwrap();
        assert_eq!(outcome.report.items[0].state, PluginState::Ok);

        let rep = derived(&model, &package.id);
        let names: Vec<String> = rep.files.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a.tiff", "c/d.tiff"]);

        let file = model
            .retrieve_file(&package.id, &rep.id, &RelativePath::parse("a.tiff").unwrap())
            .unwrap();
        let content = model.reader().retrieve_file_content(&file).unwrap().into_bytes().unwrap();
        assert_eq!(content, b"AAA");

        let events = model.list_preservation_events(&package.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, EventOutcome::Success);
        assert_eq!(events[0].affected_file_ids, vec!["a.jpg", "c/d.JPG"]);
        assert_eq!(events[0].details[DETAIL_NEW_REPRESENTATION], rep.id.to_string());
        assert_eq!(events[0].details[DETAIL_SOURCE_REPRESENTATION], "r1");
    }

    #[test]
    fn size_limit_and_input_format_narrow_candidates() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let big = vec![b'x'; 2048];
        let package = package_with(&model, &[("big.png", &big), ("small.png", b"s"), ("c.jpg", b"c")]);
        let tool = FakeTool::new(&["jpg", "png"]);

        PluginRunner::new(model.clone())
            .run(
                &mut ConvertPlugin::new(tool.clone()),
                &params(&[
                    (PARAM_OUTPUT_FORMAT, "tiff"),
                    (PARAM_INPUT_FORMAT, "png"),
                    (PARAM_MAX_KBYTES, "1"),
                ]),
                &[package.clone()],
            )
            .unwrap();
        assert_eq!(*tool.calls.lock().unwrap(), vec!["png->tiff"]);
        let names: Vec<String> = derived(&model, &package.id).files.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["small.tiff"]);
    }

    #[test]
    fn tool_failure_degrades_outcome() {
        for (partial, expected_state, expected_outcome) in [
            ("true", PluginState::PartialSuccess, EventOutcome::PartialSuccess),
            ("false", PluginState::Failure, EventOutcome::Failure),
        ] {
            let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
            let package = package_with(&model, &[("a.jpg", b"ok"), ("b.jpg", b"fail")]);
            let outcome = PluginRunner::new(model.clone())
                .run(
                    &mut ConvertPlugin::new(FakeTool::new(&["jpg"])),
                    &params(&[(PARAM_OUTPUT_FORMAT, "png"), (PARAM_PARTIAL_SUCCESS, partial)]),
                    &[package.clone()],
                )
                .unwrap();

            assert_eq!(outcome.report.items[0].state, expected_state);
            let events = model.list_preservation_events(&package.id).unwrap();
            assert_eq!(events[0].outcome, expected_outcome);
            assert_eq!(events[0].affected_file_ids, vec!["a.jpg"]);
            let names: Vec<String> = derived(&model, &package.id).files.iter().map(ToString::to_string).collect();
            assert_eq!(names, vec!["a.png"]);
        }
    }

    #[test]
    fn nothing_to_convert_still_records_event() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let package = package_with(&model, &[("notes.txt", b"n")]);
        let outcome = PluginRunner::new(model.clone())
            .run(
                &mut ConvertPlugin::new(FakeTool::new(&["jpg"])),
                &params(&[(PARAM_OUTPUT_FORMAT, "tiff")]),
                &[package.clone()],
            )
            .unwrap();
        assert_eq!(outcome.report.items[0].state, PluginState::Ok);
        let package = model.retrieve_package(&package.id).unwrap();
        assert_eq!(package.representations.len(), 1);
        let events = model.list_preservation_events(&package.id).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].affected_file_ids.is_empty());
    }

    #[test]
    fn output_format_is_required() {
        let mut plugin = ConvertPlugin::new(FakeTool::new(&["jpg"]));
        assert!(plugin.set_parameter_values(&params(&[])).is_err());
        assert!(plugin.set_parameter_values(&params(&[(PARAM_OUTPUT_FORMAT, " ")])).is_err());

        let plugin = ConvertPlugin::new(FakeTool::new(&["jpg"])).with_defaults(10, false);
        let mut fresh = plugin.clone_me();
        fresh.set_parameter_values(&params(&[(PARAM_OUTPUT_FORMAT, "png")])).unwrap();
        let values = fresh.parameter_values();
        assert_eq!(values[PARAM_MAX_KBYTES], "10");
        assert_eq!(values[PARAM_PARTIAL_SUCCESS], "false");
    }

    #[test]
    fn negative_size_limit_is_rejected() {
        let mut plugin = ConvertPlugin::new(FakeTool::new(&["jpg"]));
        let err = plugin
            .set_parameter_values(&params(&[(PARAM_OUTPUT_FORMAT, "tiff"), (PARAM_MAX_KBYTES, "-1")]))
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidParameter(msg) if msg.contains(PARAM_MAX_KBYTES)));
    }

    #[test]
    fn same_stem_sources_do_not_overwrite_each_other() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let package = package_with(&model, &[("a.jpg", b"jpeg"), ("a.png", b"png")]);
        let tool = FakeTool::new(&["jpg", "png"]);

        let outcome = PluginRunner::new(model.clone())
            .run(
                &mut ConvertPlugin::new(tool.clone()),
                &params(&[(PARAM_OUTPUT_FORMAT, "tiff")]),
                &[package.clone()],
            )
            .unwrap();
        assert_eq!(outcome.report.items[0].state, PluginState::PartialSuccess);
        assert_eq!(tool.calls.lock().unwrap().len(), 1);

        let rep = derived(&model, &package.id);
        let names: Vec<String> = rep.files.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a.tiff"]);
        let file = model
            .retrieve_file(&package.id, &rep.id, &RelativePath::parse("a.tiff").unwrap())
            .unwrap();
        let content = model.reader().retrieve_file_content(&file).unwrap().into_bytes().unwrap();
        assert_eq!(content, b"JPEG");

        let events = model.list_preservation_events(&package.id).unwrap();
        assert_eq!(events[0].outcome, EventOutcome::PartialSuccess);
        assert_eq!(events[0].affected_file_ids, vec!["a.jpg"]);
    }

    #[test]
    fn each_source_representation_gets_its_own_derivative() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let package = package_with(&model, &[("a.jpg", b"a")]);
        let second = RepresentationId::new("r2").unwrap();
        model.create_representation(&package.id, second.clone(), true).unwrap();
        for path in ["b.jpg", "c.txt"] {
            model
                .create_file(&package.id, &second, &RelativePath::parse(path).unwrap(), &mut &b"b"[..])
                .unwrap();
        }
        let package = model.retrieve_package(&package.id).unwrap();

        let outcome = PluginRunner::new(model.clone())
            .run(
                &mut ConvertPlugin::new(FakeTool::new(&["jpg"])),
                &params(&[(PARAM_OUTPUT_FORMAT, "tiff")]),
                &[package.clone()],
            )
            .unwrap();
        assert_eq!(outcome.report.items[0].state, PluginState::Ok);

        let stored = model.retrieve_package(&package.id).unwrap();
        let derivatives: Vec<&Representation> =
            stored.representations.iter().filter(|r| !r.original).collect();
        assert_eq!(derivatives.len(), 2);
        assert_eq!(stored.representations.len(), 4);

        let mut events = model.list_preservation_events(&package.id).unwrap();
        events.sort_by(|a, b| a.representation_id.cmp(&b.representation_id));
        assert_eq!(events.len(), 2);
        for (event, (source, converted)) in events.iter().zip([("r1", "a.jpg"), ("r2", "b.jpg")]) {
            assert_eq!(event.details[DETAIL_SOURCE_REPRESENTATION], source);
            assert_eq!(event.affected_file_ids, vec![converted]);
            let new_id = &event.details[DETAIL_NEW_REPRESENTATION];
            let derivative = derivatives.iter().find(|r| r.id.as_str() == new_id.as_str()).unwrap();
            let expected = converted.replace(".jpg", ".tiff");
            let names: Vec<String> = derivative.files.iter().map(ToString::to_string).collect();
            assert_eq!(names, vec![expected]);
        }
        assert_ne!(events[0].details[DETAIL_NEW_REPRESENTATION], events[1].details[DETAIL_NEW_REPRESENTATION]);
    }
}
