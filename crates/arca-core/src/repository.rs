use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use arca_index::{IndexBackend, IndexService, InMemoryIndex, QueuedObserver, RebuildSummary};
use arca_model::ModelService;
use arca_plugins::ingest::PARAM_PARENT_ID;
use arca_plugins::{
    CommandTool, ConversionTool, ConvertPlugin, JobOutcome, PluginRunner, SipToPackagePlugin,
    TransferredResource,
};
use arca_store::{InMemoryStorage, StorageService};
use arca_types::PackageId;

use crate::config::RepositoryConfig;
use crate::error::{CoreError, CoreResult};

/// The wired-up repository: storage, model, index and plugin runner.
///
/// Built once and passed explicitly to whatever needs it. The index
/// observer is registered with the model service at construction.
pub struct Repository {
    config: RepositoryConfig,
    storage: Arc<dyn StorageService>,
    model: Arc<ModelService>,
    index: IndexService,
    queue: Option<Arc<QueuedObserver>>,
    runner: PluginRunner,
}

impl Repository {
    pub fn new(
        config: RepositoryConfig,
        storage: Arc<dyn StorageService>,
        backend: Arc<dyn IndexBackend>,
    ) -> Self {
        let model = Arc::new(ModelService::new(storage.clone()));
        let index = IndexService::new(model.reader().clone(), backend, config.index.clone());

        let queue = if config.index.queued {
            let queue = Arc::new(QueuedObserver::new(index.model_observer()));
            model.register_observer(queue.clone());
            Some(queue)
        } else {
            model.register_observer(index.model_observer());
            None
        };

        info!(queued_index = config.index.queued, "repository opened");
        Self {
            runner: PluginRunner::new(model.clone()),
            config,
            storage,
            model,
            index,
            queue,
        }
    }

    /// A repository backed entirely by memory.
    pub fn in_memory(config: RepositoryConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryIndex::new()),
        )
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.storage
    }

    pub fn model(&self) -> &Arc<ModelService> {
        &self.model
    }

    pub fn index(&self) -> &IndexService {
        &self.index
    }

    pub fn runner(&self) -> &PluginRunner {
        &self.runner
    }

    /// Ingest SIP directories, optionally under `parent`.
    pub fn ingest(
        &self,
        resources: &[TransferredResource],
        parent: Option<&PackageId>,
    ) -> CoreResult<JobOutcome> {
        let mut parameters = BTreeMap::new();
        if let Some(parent) = parent {
            parameters.insert(PARAM_PARENT_ID.to_string(), parent.to_string());
        }
        Ok(self
            .runner
            .run(&mut SipToPackagePlugin::new(), &parameters, resources)?)
    }

    /// The command-line tool configured under `name`.
    pub fn tool(&self, name: &str) -> CoreResult<CommandTool> {
        self.config
            .tool(name)
            .map(|config| CommandTool::new(name, config))
            .ok_or_else(|| CoreError::UnknownTool(name.to_string()))
    }

    /// Convert packages with the command-line tool configured under `tool`.
    pub fn convert(
        &self,
        tool: &str,
        packages: &[PackageId],
        parameters: &BTreeMap<String, String>,
    ) -> CoreResult<JobOutcome> {
        let tool = Arc::new(self.tool(tool)?);
        self.convert_with(tool, packages, parameters)
    }

    /// Convert packages with any conversion tool.
    pub fn convert_with(
        &self,
        tool: Arc<dyn ConversionTool>,
        packages: &[PackageId],
        parameters: &BTreeMap<String, String>,
    ) -> CoreResult<JobOutcome> {
        let items = packages
            .iter()
            .map(|id| self.model.retrieve_package(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut plugin = ConvertPlugin::new(tool).with_defaults(
            self.config.conversion.max_kbytes,
            self.config.conversion.has_partial_success_on_outcome,
        );
        Ok(self.runner.run(&mut plugin, parameters, &items)?)
    }

    /// Rebuild the package collections of the index from storage.
    pub fn rebuild_index(&self, cancel: &AtomicBool) -> CoreResult<RebuildSummary> {
        self.sync_index();
        Ok(self.index.reindex_packages(cancel)?)
    }

    /// Wait for queued index updates to be applied. A no-op when the index
    /// is updated inline.
    pub fn sync_index(&self) {
        if let Some(queue) = &self.queue {
            if !queue.wait_idle(Duration::from_secs(30)) {
                warn!(pending = queue.pending(), "index queue did not drain in time");
            }
        }
    }

    /// Drain queued index updates and stop the background worker.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        info!("repository shut down");
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::path::Path;

    use arca_index::{fields, DocType, Filter, IndexDocument, Query, Sublist};
    use arca_plugins::convert::PARAM_OUTPUT_FORMAT;
    use arca_plugins::CommandError;
    use arca_types::{EventOutcome, PluginState, RelativePath};
    use tempfile::{NamedTempFile, TempDir};

    use super::*;

    /// Copies payloads through unchanged.
    struct Passthrough {
        formats: Vec<String>,
    }

    fn passthrough() -> Arc<dyn ConversionTool> {
        Arc::new(Passthrough {
            formats: vec!["jpg".to_string()],
        })
    }

    impl ConversionTool for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn input_formats(&self) -> &[String] {
            &self.formats
        }

        fn convert(
            &self,
            input: &mut dyn Read,
            _input_format: &str,
            _output_format: &str,
            _arguments: &str,
        ) -> Result<NamedTempFile, CommandError> {
            let mut out = NamedTempFile::new()?;
            std::io::copy(input, &mut out)?;
            out.flush()?;
            Ok(out)
        }
    }

    fn write_sip(root: &Path) {
        let data = root.join("representations/rep1/data");
        fs::create_dir_all(data.join("c")).unwrap();
        fs::write(data.join("a.jpg"), b"jpeg a").unwrap();
        fs::write(data.join("b.txt"), b"text b").unwrap();
        fs::write(data.join("c/d.jpg"), b"jpeg d").unwrap();
    }

    fn names(files: &[RelativePath]) -> Vec<String> {
        files.iter().map(ToString::to_string).collect()
    }

    const PACKAGE_DOCS: [DocType; 4] = [
        DocType::Package,
        DocType::Representation,
        DocType::File,
        DocType::PreservationEvent,
    ];

    fn snapshot(repo: &Repository) -> Vec<Vec<IndexDocument>> {
        PACKAGE_DOCS
            .into_iter()
            .map(|doc_type| {
                repo.index()
                    .find(doc_type, &Query::default().page(Sublist::all()))
                    .unwrap()
                    .results
            })
            .collect()
    }

    /// Ingest three files, convert the jpgs, and check storage, provenance
    /// and the index.
    fn ingest_then_convert(repo: &Repository, convert: impl FnOnce(&PackageId) -> JobOutcome) {
        let sip = TempDir::new().unwrap();
        write_sip(sip.path());

        let ingest = repo
            .ingest(&[TransferredResource::new("sip-1", sip.path())], None)
            .unwrap();
        assert_eq!(ingest.report.items[0].state, PluginState::Ok);
        let package_id = PackageId::new(ingest.report.items[0].item_id.as_str()).unwrap();

        let package = repo.model().retrieve_package(&package_id).unwrap();
        assert_eq!(package.representations.len(), 1);
        assert_eq!(names(&package.representations[0].files), vec!["a.jpg", "b.txt", "c/d.jpg"]);
        assert!(package.descriptive_metadata.is_empty());

        let outcome = convert(&package_id);
        assert_eq!(outcome.report.items[0].state, PluginState::Ok);

        let package = repo.model().retrieve_package(&package_id).unwrap();
        assert_eq!(package.representations.len(), 2);
        let derived = package.representations.iter().find(|r| !r.original).unwrap();
        assert_eq!(names(&derived.files), vec!["a.tiff", "c/d.tiff"]);

        let events = repo.model().list_preservation_events(&package_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].affected_file_ids, vec!["a.jpg", "c/d.jpg"]);
        assert_eq!(events[0].outcome, EventOutcome::Success);

        repo.sync_index();
        let by_package = Filter::all().equals(fields::PACKAGE_ID, package_id.as_str());
        assert_eq!(repo.index().count(DocType::Representation, &by_package).unwrap(), 2);
        let tiffs = by_package.clone().equals(fields::EXTENSION, "tiff");
        assert_eq!(repo.index().count(DocType::File, &tiffs).unwrap(), 2);
        assert_eq!(repo.index().count(DocType::PreservationEvent, &by_package).unwrap(), 1);

        // A rebuild from storage reproduces what incremental updates built.
        let incremental = snapshot(repo);
        for doc_type in PACKAGE_DOCS {
            repo.index().clear_index(doc_type).unwrap();
        }
        let summary = repo.rebuild_index(&AtomicBool::new(false)).unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(snapshot(repo), incremental);
    }

    #[test]
    fn ingest_and_convert_in_process() {
        let repo = Repository::in_memory(RepositoryConfig::default());
        ingest_then_convert(&repo, |id| {
            let parameters = BTreeMap::from([(PARAM_OUTPUT_FORMAT.to_string(), "tiff".to_string())]);
            repo.convert_with(passthrough(), &[id.clone()], &parameters)
                .unwrap()
        });
    }

    #[test]
    fn ingest_and_convert_with_queued_index() {
        let mut config = RepositoryConfig::default();
        config.index.queued = true;
        let repo = Repository::in_memory(config);
        ingest_then_convert(&repo, |id| {
            let parameters = BTreeMap::from([(PARAM_OUTPUT_FORMAT.to_string(), "tiff".to_string())]);
            repo.convert_with(passthrough(), &[id.clone()], &parameters)
                .unwrap()
        });
        repo.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn ingest_and_convert_with_external_command() {
        let config = RepositoryConfig::from_toml_str(
            r#"
            [tools.copy]
            command_line = "cp {input_file} {output_file}"
            timeout_secs = 10
            input_formats = ["jpg"]
            "#,
        )
        .unwrap();
        let repo = Repository::in_memory(config);
        ingest_then_convert(&repo, |id| {
            let parameters = BTreeMap::from([
                (PARAM_OUTPUT_FORMAT.to_string(), "tiff".to_string()),
                ("maxKbytes".to_string(), "20000".to_string()),
            ]);
            repo.convert("copy", &[id.clone()], &parameters).unwrap()
        });
    }

    #[test]
    fn unknown_tool_and_missing_package() {
        let repo = Repository::in_memory(RepositoryConfig::default());
        let err = repo.convert("nope", &[], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownTool(_)));

        let err = repo
            .convert_with(
                passthrough(),
                &[PackageId::new("ghost").unwrap()],
                &BTreeMap::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), arca_types::ErrorKind::NotFound);
    }
}
