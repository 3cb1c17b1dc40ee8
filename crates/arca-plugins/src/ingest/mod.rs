//! Ingest: turn transferred submissions into packages.

pub mod sip;

use std::collections::BTreeMap;

use arca_types::{Package, PackageId, PluginState, ReportItem};

use crate::error::{PluginError, PluginResult};
use crate::parameter::{ParameterKind, ParameterValues, PluginParameter};
use crate::plugin::{Plugin, PluginContext, PluginInfo, PluginType, TransferredResource};

pub use sip::{sip_to_package, Sip, SipManifest};

pub const PARAM_PARENT_ID: &str = "parentId";

/// Report attribute holding the id of the created package.
pub const ATTR_PACKAGE_ID: &str = "packageId";

/// Ingests SIP directories, one package per transferred resource.
///
/// On success the report item is re-keyed to the new package id. On
/// failure the item keeps the resource id and no package is left behind.
#[derive(Debug, Default)]
pub struct SipToPackagePlugin {
    values: ParameterValues,
}

impl SipToPackagePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn parent_id(&self) -> PluginResult<Option<PackageId>> {
        self.values
            .get(PARAM_PARENT_ID)
            .filter(|id| !id.is_empty())
            .map(PackageId::new)
            .transpose()
            .map_err(|e| PluginError::InvalidParameter(format!("{PARAM_PARENT_ID}: {e}")))
    }
}

impl Plugin<TransferredResource> for SipToPackagePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: "sip-to-package".to_string(),
            name: "SIP to package".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Creates a package from a SIP directory".to_string(),
            plugin_type: PluginType::Ingest,
        }
    }

    fn parameters(&self) -> Vec<PluginParameter> {
        vec![PluginParameter::new(PARAM_PARENT_ID, ParameterKind::String)
            .described("package under which ingested packages are placed")]
    }

    fn set_parameter_values(&mut self, values: &BTreeMap<String, String>) -> PluginResult<()> {
        let resolved = ParameterValues::resolve(&self.parameters(), values)?;
        let previous = std::mem::replace(&mut self.values, resolved);
        if let Err(e) = self.parent_id() {
            self.values = previous;
            return Err(e);
        }
        Ok(())
    }

    fn parameter_values(&self) -> BTreeMap<String, String> {
        self.values.as_map().clone()
    }

    fn execute_item(
        &mut self,
        ctx: &PluginContext,
        resource: &TransferredResource,
        report: &mut ReportItem,
    ) -> PluginResult<()> {
        let sip = Sip::parse(&resource.path)?;
        let package: Package = sip_to_package(&ctx.model, &sip, self.parent_id()?)?;
        report.item_id = package.id.to_string();
        report.add_attribute(ATTR_PACKAGE_ID, package.id.as_str());
        report.finish(PluginState::Ok);
        Ok(())
    }

    fn clone_me(&self) -> Box<dyn Plugin<TransferredResource>> {
        Box::new(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arca_model::{ModelService, NewPackage};
    use arca_store::InMemoryStorage;
    use arca_types::job::ATTR_OUTCOME_DETAILS;
    use tempfile::TempDir;

    use super::sip::fixtures::write_sip;
    use super::*;
    use crate::runner::{PluginRunner, ATTR_SOURCE_OBJECT_ID};

    #[test]
    fn each_resource_becomes_a_package_or_a_failure() {
        let model = Arc::new(ModelService::new(Arc::new(InMemoryStorage::new())));
        let parent = model.create_package(NewPackage::default()).unwrap();

        let good = TempDir::new().unwrap();
        write_sip(good.path(), &[("a.jpg", b"a")]);
        let bad = TempDir::new().unwrap();

        let resources = [
            TransferredResource::new("good-sip", good.path()),
            TransferredResource::new("bad-sip", bad.path()),
        ];
        let parameters = BTreeMap::from([(PARAM_PARENT_ID.to_string(), parent.id.to_string())]);
        let outcome = PluginRunner::new(model.clone())
            .run(&mut SipToPackagePlugin::new(), &parameters, &resources)
            .unwrap();

        let items = &outcome.report.items;
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].state, PluginState::Ok);
        assert_eq!(items[0].attributes[ATTR_SOURCE_OBJECT_ID], "good-sip");
        let package = model
            .retrieve_package(&PackageId::new(items[0].item_id.as_str()).unwrap())
            .unwrap();
        assert_eq!(package.parent_id.as_ref(), Some(&parent.id));
        assert!(!package.active);

        assert_eq!(items[1].state, PluginState::Failure);
        assert_eq!(items[1].item_id, "bad-sip");
        assert!(items[1].attributes[ATTR_OUTCOME_DETAILS].contains("Migration"));
    }

    #[test]
    fn parent_id_must_be_a_valid_id() {
        let mut plugin = SipToPackagePlugin::new();
        let bad = BTreeMap::from([(PARAM_PARENT_ID.to_string(), "../escape".to_string())]);
        assert!(matches!(
            plugin.set_parameter_values(&bad),
            Err(PluginError::InvalidParameter(_))
        ));
        assert!(plugin.parameter_values().is_empty());
    }
}
