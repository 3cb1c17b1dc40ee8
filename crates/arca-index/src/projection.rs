//! Projection of canonical objects into index documents.
//!
//! Shared by the incremental observer and the full rebuild so both produce
//! identical documents for the same canonical state.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{error, warn};

use arca_model::{ModelError, ModelReader, ModelResult};
use arca_types::{
    AncestorStep, AncestorWalk, File, Job, LogEntry, Package, PackageId, PreservationEvent,
    RelativePath, Report, Representation, RepresentationId,
};

use crate::document::{fields, timestamp, DocType, IndexDocument};

/// Resolved ancestor chain of a package, nearest first.
///
/// An unresolvable ancestor appears as `None` in both lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lineage {
    pub ids: Vec<Option<PackageId>>,
    pub titles: Vec<Option<String>>,
}

impl Lineage {
    fn ids_value(&self) -> Value {
        Value::Array(
            self.ids
                .iter()
                .map(|id| id.as_ref().map_or(Value::Null, |id| json!(id.as_str())))
                .collect(),
        )
    }

    /// Ancestor ids plus the package itself, for documents below a package.
    fn with_self(&self, package: &PackageId) -> Value {
        let mut ids = match self.ids_value() {
            Value::Array(ids) => ids,
            _ => Vec::new(),
        };
        ids.insert(0, json!(package.as_str()));
        Value::Array(ids)
    }
}

pub fn representation_doc_id(package: &PackageId, representation: &str) -> String {
    format!("{package}/{representation}")
}

pub fn file_doc_id(
    package: &PackageId,
    representation: &RepresentationId,
    path: &RelativePath,
) -> String {
    format!("{package}/{representation}/{path}")
}

pub fn report_item_doc_id(report: &Report, item_id: &str) -> String {
    format!("{}/{item_id}", report.job_id)
}

/// Builds index documents from canonical state read through a [`ModelReader`].
#[derive(Clone, Debug)]
pub struct Projector {
    reader: ModelReader,
}

impl Projector {
    pub fn new(reader: ModelReader) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &ModelReader {
        &self.reader
    }

    /// Walk `parent_id` links up to a root, a cycle or a dangling reference.
    pub fn lineage(&self, package: &Package) -> Lineage {
        let mut titles: HashMap<PackageId, Option<String>> = HashMap::new();
        let mut walk = AncestorWalk::new(&package.id, package.parent_id.clone(), |id| {
            match self.reader.package_record(id) {
                Ok(record) => {
                    titles.insert(record.id.clone(), record.title.clone());
                    Some(record.parent_id)
                }
                Err(ModelError::NotFound(_)) => None,
                Err(e) => {
                    error!(package = %id, error = %e, "failed to read ancestor");
                    None
                }
            }
        });
        let steps: Vec<AncestorStep> = walk.by_ref().collect();
        if let Some(at) = walk.cycle_at() {
            warn!(package = %package.id, cycle_at = %at, "ancestor chain has a cycle; truncated");
        }
        drop(walk);

        let mut lineage = Lineage::default();
        for step in steps {
            match step {
                AncestorStep::Found(id) => {
                    lineage.titles.push(titles.remove(&id).flatten());
                    lineage.ids.push(Some(id));
                }
                AncestorStep::Dangling(id) => {
                    warn!(package = %package.id, ancestor = %id, "ancestor does not exist; substituting null");
                    lineage.ids.push(None);
                    lineage.titles.push(None);
                }
            }
        }
        lineage
    }

    pub fn package_document(&self, package: &Package, lineage: &Lineage) -> IndexDocument {
        let mut title_path: Vec<Value> = lineage
            .titles
            .iter()
            .rev()
            .map(|t| t.as_ref().map_or(Value::Null, |t| json!(t)))
            .collect();
        title_path.push(package.title.as_ref().map_or(Value::Null, |t| json!(t)));

        let permissions: serde_json::Map<String, Value> = package
            .permissions
            .grants
            .iter()
            .map(|(kind, principals)| (format!("{kind:?}").to_lowercase(), json!(principals)))
            .collect();

        IndexDocument::new(DocType::Package, package.id.as_str())
            .with(
                fields::PARENT_ID,
                package.parent_id.as_ref().map_or(Value::Null, |p| json!(p.as_str())),
            )
            .with(fields::TITLE, package.title.clone().map_or(Value::Null, Value::String))
            .with(fields::ACTIVE, package.active)
            .with(fields::ANCESTORS, lineage.ids_value())
            .with(fields::TITLE_PATH, Value::Array(title_path))
            .with(fields::PERMISSIONS, Value::Object(permissions))
            .with(fields::REPRESENTATION_COUNT, package.representations.len())
            .with(
                fields::METADATA_IDS,
                json!(package.descriptive_metadata.iter().map(|m| &m.id).collect::<Vec<_>>()),
            )
            .with(
                fields::METADATA_TYPES,
                json!(package
                    .descriptive_metadata
                    .iter()
                    .map(|m| &m.metadata_type)
                    .collect::<Vec<_>>()),
            )
            .with(fields::CREATED_AT, timestamp(&package.created_at))
            .with(fields::UPDATED_AT, timestamp(&package.updated_at))
    }

    pub fn representation_document(
        &self,
        representation: &Representation,
        files: &[File],
        lineage: &Lineage,
    ) -> IndexDocument {
        let payloads = files.iter().filter(|f| !f.is_directory);
        IndexDocument::new(
            DocType::Representation,
            representation_doc_id(&representation.package_id, representation.id.as_str()),
        )
        .with(fields::PACKAGE_ID, representation.package_id.as_str())
        .with(fields::REPRESENTATION_ID, representation.id.as_str())
        .with(fields::ORIGINAL, representation.original)
        .with(fields::FILE_COUNT, payloads.clone().count())
        .with(fields::TOTAL_SIZE, payloads.map(|f| f.size).sum::<u64>())
        .with(fields::ANCESTORS, lineage.with_self(&representation.package_id))
        .with(fields::CREATED_AT, timestamp(&representation.created_at))
    }

    pub fn file_document(&self, file: &File, lineage: &Lineage) -> IndexDocument {
        IndexDocument::new(
            DocType::File,
            file_doc_id(&file.package_id, &file.representation_id, &file.path),
        )
            .with(fields::PACKAGE_ID, file.package_id.as_str())
            .with(fields::REPRESENTATION_ID, file.representation_id.as_str())
            .with(fields::PATH, file.path.to_string())
            .with(fields::NAME, file.path.name.as_str())
            .with(fields::FOLDERS, json!(file.path.folders))
            .with(
                fields::EXTENSION,
                file.path.extension().map_or(Value::Null, Value::String),
            )
            .with(fields::IS_DIRECTORY, file.is_directory)
            .with(fields::SIZE, file.size)
            .with(
                fields::DIGEST,
                file.digest.clone().map_or(Value::Null, Value::String),
            )
            .with(fields::ANCESTORS, lineage.with_self(&file.package_id))
    }

    pub fn event_document(&self, event: &PreservationEvent) -> IndexDocument {
        IndexDocument::new(DocType::PreservationEvent, event.id.as_str())
            .with(fields::PACKAGE_ID, event.package_id.as_str())
            .with(
                fields::REPRESENTATION_ID,
                event
                    .representation_id
                    .as_ref()
                    .map_or(Value::Null, |r| json!(r.as_str())),
            )
            .with(fields::EVENT_TYPE, event.event_type.as_str())
            .with(fields::OUTCOME, event.outcome.to_string())
            .with(fields::AFFECTED_FILES, json!(event.affected_file_ids))
            .with(fields::DETAILS, json!(event.details))
            .with(fields::AGENT, event.agent.as_str())
            .with(fields::DATETIME, timestamp(&event.timestamp))
    }

    pub fn log_document(&self, entry: &LogEntry) -> IndexDocument {
        IndexDocument::new(DocType::ActionLog, entry.id.as_str())
            .with(fields::ACTION_COMPONENT, entry.action_component.as_str())
            .with(fields::ACTION_METHOD, entry.action_method.as_str())
            .with(
                fields::RELATED_OBJECT_ID,
                entry.related_object_id.clone().map_or(Value::Null, Value::String),
            )
            .with(
                fields::USERNAME,
                entry.username.clone().map_or(Value::Null, Value::String),
            )
            .with(fields::PARAMETERS, json!(entry.parameters))
            .with(fields::DURATION_MS, entry.duration_ms)
            .with(fields::DATETIME, timestamp(&entry.datetime))
    }

    pub fn job_document(&self, job: &Job) -> IndexDocument {
        let mut doc = IndexDocument::new(DocType::Job, job.id.as_str())
            .with(fields::PLUGIN_ID, job.plugin_id.as_str())
            .with(fields::STATE, json!(job.state))
            .with(fields::PARAMETERS, json!(job.parameters))
            .with("sourceObjects", job.source_objects)
            .with("processedOk", job.processed_ok)
            .with("processedPartial", job.processed_partial)
            .with("processedFailed", job.processed_failed)
            .with(fields::CREATED_AT, timestamp(&job.created_at));
        if let Some(finished) = &job.finished_at {
            doc.set("finishedAt", timestamp(finished));
        }
        doc
    }

    /// One document per report item.
    pub fn report_documents(&self, report: &Report) -> Vec<IndexDocument> {
        report
            .items
            .iter()
            .map(|item| {
                IndexDocument::new(DocType::JobReport, report_item_doc_id(report, &item.item_id))
                    .with(fields::JOB_ID, report.job_id.as_str())
                    .with(fields::PLUGIN_ID, item.plugin_id.as_str())
                    .with(fields::ITEM_ID, item.item_id.as_str())
                    .with(fields::STATE, json!(item.state))
                    .with(fields::ATTRIBUTES, json!(item.attributes))
                    .with(fields::CREATED_AT, timestamp(&item.date_created))
                    .with(fields::UPDATED_AT, timestamp(&item.date_updated))
            })
            .collect()
    }

    /// Every document derived from one package: the package, its
    /// representations, their files, and its preservation events.
    pub fn package_documents(&self, package: &Package) -> ModelResult<Vec<IndexDocument>> {
        let lineage = self.lineage(package);
        let mut docs = vec![self.package_document(package, &lineage)];
        for representation in &package.representations {
            let files = self
                .reader
                .list_all_files(&package.id, &representation.id)?
                .collect::<ModelResult<Vec<File>>>()?;
            docs.push(self.representation_document(representation, &files, &lineage));
            docs.extend(files.iter().map(|f| self.file_document(f, &lineage)));
        }
        for event in self.reader.list_preservation_events(&package.id)? {
            docs.push(self.event_document(&event));
        }
        Ok(docs)
    }
}
