use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use arca_index::IndexConfig;
use arca_plugins::convert::DEFAULT_MAX_KBYTES;
use arca_plugins::ToolConfig;

use crate::error::ConfigError;

/// Defaults applied to conversion jobs that leave them unset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub max_kbytes: u64,
    pub has_partial_success_on_outcome: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_kbytes: DEFAULT_MAX_KBYTES,
            has_partial_success_on_outcome: true,
        }
    }
}

/// Repository-wide settings, usually read from a TOML file.
///
/// ```toml
/// log_filter = "info,arca_index=debug"
///
/// [index]
/// queued = true
///
/// [conversion]
/// max_kbytes = 50000
///
/// [tools.imagemagick]
/// command_line = "magick {input_file} {arguments} {output_file}"
/// timeout_secs = 120
/// input_formats = ["jpg", "png"]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// `tracing` filter directives, used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub index: IndexConfig,
    pub conversion: ConversionConfig,
    /// Tool configurations by name; these replace built-in presets of the
    /// same name.
    pub tools: BTreeMap<String, ToolConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            index: IndexConfig::default(),
            conversion: ConversionConfig::default(),
            tools: BTreeMap::new(),
        }
    }
}

impl RepositoryConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Configured tool by name, falling back to the built-in preset.
    pub fn tool(&self, name: &str) -> Option<ToolConfig> {
        self.tools.get(name).cloned().or_else(|| ToolConfig::preset(name))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = RepositoryConfig::default();
        assert_eq!(config.log_filter, "info");
        assert!(!config.index.queued);
        assert!(config.index.optimize_after_rebuild);
        assert_eq!(config.conversion.max_kbytes, 20_000);
        assert!(config.conversion.has_partial_success_on_outcome);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RepositoryConfig::from_toml_str(
            r#"
            [index]
            queued = true

            [tools.imagemagick]
            command_line = "magick {input_file} {output_file}"
            input_formats = ["jpg"]
            "#,
        )
        .unwrap();
        assert!(config.index.queued);
        assert!(config.index.optimize_after_rebuild);
        assert_eq!(config.conversion, ConversionConfig::default());

        let tool = config.tool("imagemagick").unwrap();
        assert_eq!(tool.command_line, "magick {input_file} {output_file}");
        assert_eq!(tool.timeout_secs, 300);
        assert_eq!(config.tool("sox"), ToolConfig::preset("sox"));
        assert!(config.tool("nope").is_none());
    }

    #[test]
    fn load_reports_path_and_syntax_errors() {
        let missing = RepositoryConfig::load(Path::new("/nonexistent/arca.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_filter = [").unwrap();
        let err = RepositoryConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_filter = \"debug\"").unwrap();
        assert_eq!(RepositoryConfig::load(file.path()).unwrap().log_filter, "debug");
    }
}
