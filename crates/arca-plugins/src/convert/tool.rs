//! External conversion tools.
//!
//! A tool takes one input stream and produces one output file. The
//! command-line tool stages the input in a scoped temporary file, runs the
//! configured command with a timeout, and hands back the output as another
//! scoped temporary file. Both are removed when dropped.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::CommandError;

pub const INPUT_PLACEHOLDER: &str = "{input_file}";
pub const OUTPUT_PLACEHOLDER: &str = "{output_file}";
pub const ARGUMENTS_PLACEHOLDER: &str = "{arguments}";

/// Converts a single payload from one format to another.
pub trait ConversionTool: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case extensions the tool accepts by default.
    fn input_formats(&self) -> &[String];

    /// Convert `input` and return the produced file.
    fn convert(
        &self,
        input: &mut dyn Read,
        input_format: &str,
        output_format: &str,
        arguments: &str,
    ) -> Result<NamedTempFile, CommandError>;
}

/// Settings of one command-line tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Command template. `{input_file}` and `{output_file}` are replaced by
    /// the staged paths; `{arguments}` by the extra arguments, which are
    /// appended when the placeholder is absent.
    pub command_line: String,
    pub timeout_secs: u64,
    pub input_formats: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command_line: String::new(),
            timeout_secs: 300,
            input_formats: Vec::new(),
        }
    }
}

impl ToolConfig {
    pub fn new(command_line: impl Into<String>, input_formats: &[&str]) -> Self {
        Self {
            command_line: command_line.into(),
            input_formats: input_formats.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Built-in configuration for a well-known tool.
    pub fn preset(name: &str) -> Option<Self> {
        let config = match name {
            "imagemagick" => Self::new(
                "convert {input_file} {arguments} {output_file}",
                &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff"],
            ),
            "sox" => Self::new(
                "sox {input_file} {arguments} {output_file}",
                &["wav", "aiff", "flac", "mp3", "ogg"],
            ),
            "ffmpeg" => Self::new(
                "ffmpeg -y -i {input_file} {arguments} {output_file}",
                &["avi", "mov", "mp4", "mkv", "mpg", "wmv"],
            ),
            "ghostscript" => Self::new(
                "gs -dBATCH -dNOPAUSE -dSAFER -sDEVICE=pdfwrite {arguments} -sOutputFile={output_file} {input_file}",
                &["ps", "eps", "pdf"],
            ),
            _ => return None,
        };
        Some(config)
    }

    /// Every built-in preset, keyed by tool name.
    pub fn presets() -> BTreeMap<String, Self> {
        ["imagemagick", "sox", "ffmpeg", "ghostscript"]
            .into_iter()
            .filter_map(|name| Self::preset(name).map(|c| (name.to_string(), c)))
            .collect()
    }
}

/// Renders a command template into an argument vector.
///
/// The template is split on whitespace before substitution, so staged
/// paths are never re-split. Quotes carry no meaning and are dropped.
pub fn render_command(template: &str, input: &Path, output: &Path, arguments: &str) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let extra: Vec<String> = arguments.split_whitespace().map(str::to_string).collect();

    let mut argv = Vec::new();
    let mut placed_arguments = false;
    for token in template.split_whitespace() {
        if token == ARGUMENTS_PLACEHOLDER {
            argv.extend(extra.iter().cloned());
            placed_arguments = true;
            continue;
        }
        let token = token
            .replace('"', "")
            .replace(INPUT_PLACEHOLDER, &input)
            .replace(OUTPUT_PLACEHOLDER, &output);
        if !token.is_empty() {
            argv.push(token);
        }
    }
    if !placed_arguments {
        argv.extend(extra);
    }
    argv
}

/// A conversion tool backed by an external command.
#[derive(Clone, Debug)]
pub struct CommandTool {
    name: String,
    config: ToolConfig,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, config: ToolConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        ToolConfig::preset(name).map(|config| Self::new(name, config))
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn run(&self, argv: &[String]) -> Result<(), CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyCommandLine)?;
        let command = argv.join(" ");
        let timeout = Duration::from_secs(self.config.timeout_secs);

        // stderr goes to a file so a chatty tool cannot block on a full pipe.
        let mut stderr = tempfile::tempfile()?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr.try_clone()?)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        debug!(tool = %self.name, %command, "running conversion tool");
        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                warn!(tool = %self.name, %command, timeout_secs = self.config.timeout_secs, "tool timed out; killing");
                child.kill()?;
                child.wait()?;
                return Err(CommandError::TimedOut {
                    command,
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        if !status.success() {
            let mut message = String::new();
            stderr.seek(SeekFrom::Start(0))?;
            stderr.read_to_string(&mut message)?;
            return Err(CommandError::Failed {
                command,
                status: status.to_string(),
                stderr: message.trim().to_string(),
            });
        }
        Ok(())
    }
}

impl ConversionTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_formats(&self) -> &[String] {
        &self.config.input_formats
    }

    fn convert(
        &self,
        input: &mut dyn Read,
        input_format: &str,
        output_format: &str,
        arguments: &str,
    ) -> Result<NamedTempFile, CommandError> {
        let mut staged = tempfile::Builder::new()
            .prefix("arca-in-")
            .suffix(&format!(".{input_format}"))
            .tempfile()?;
        io::copy(input, &mut staged)?;
        staged.flush()?;

        let output = tempfile::Builder::new()
            .prefix("arca-out-")
            .suffix(&format!(".{output_format}"))
            .tempfile()?;

        let argv = render_command(&self.config.command_line, staged.path(), output.path(), arguments);
        self.run(&argv)?;

        if fs::metadata(output.path())?.len() == 0 {
            return Err(CommandError::EmptyOutput {
                command: argv.join(" "),
            });
        }
        Ok(output)
    }
}
