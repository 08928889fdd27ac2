//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use chrono::{DateTime, Utc};
use godata_core::{GcStats, Listing, Value};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Like [`write`](Self::write), but text mode emits `raw` unchanged.
    pub fn write_raw<T: Serialize>(&self, data: &T, raw: &[u8]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.write(data, String::new),
            OutputFormat::Text => {
                let mut handle = self.stdout.lock();
                handle.write_all(raw)?;
                handle.flush()?;
                Ok(())
            }
        }
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8, kind: Option<&'static str>) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    kind,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub home: String,
    pub algorithm: String,
}

/// A project as named on the command line.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub collection: String,
    pub name: String,
}

/// Output for `create` and `import` commands.
#[derive(Debug, Serialize)]
pub struct CreateOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<usize>,
}

/// Output for `remove` command.
#[derive(Debug, Serialize)]
pub struct RemoveOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
}

/// Catalog details shown by `projects --long`.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Output for `projects` command.
#[derive(Debug, Serialize)]
pub struct ProjectsOutput {
    pub success: bool,
    pub result_code: u8,
    pub collection: String,
    pub projects: Vec<ProjectEntry>,
}

/// Output for `collections` command.
#[derive(Debug, Serialize)]
pub struct CollectionsOutput {
    pub success: bool,
    pub result_code: u8,
    pub collections: Vec<String>,
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub path: String,
    #[serde(flatten)]
    pub listing: Listing,
}

/// Output for `store` command.
#[derive(Debug, Serialize)]
pub struct StoreOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub path: String,
    pub source: String,
    pub raw: bool,
}

/// Output for `link` command.
#[derive(Debug, Serialize)]
pub struct LinkOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub target: String,
    pub linked: Vec<String>,
}

/// Data variants for `get` command.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GetData {
    Value {
        shape: String,
        value: serde_json::Value,
    },
    Path {
        path: String,
    },
}

impl GetData {
    /// JSON rendering of a decoded value. Bytes are hex-encoded.
    pub fn from_value(value: &Value) -> Self {
        let rendered = match value {
            Value::Bytes(bytes) => serde_json::Value::String(hex::encode(bytes)),
            Value::Text(text) => serde_json::Value::String(text.clone()),
            Value::Json(json) => json.clone(),
            Value::Records(records) => serde_json::Value::Array(records.clone()),
            Value::Path(path) => serde_json::Value::String(path.display().to_string()),
            Value::Custom(_) => serde_json::Value::Null,
        };
        GetData::Value {
            shape: value.shape().to_string(),
            value: rendered,
        }
    }
}

/// Output for `get` command.
#[derive(Debug, Serialize)]
pub struct GetOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub path: String,
    #[serde(flatten)]
    pub data: GetData,
}

/// Output for `rm` command.
#[derive(Debug, Serialize)]
pub struct RmOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub path: String,
    pub recursive: bool,
}

/// Output for `mv` command.
#[derive(Debug, Serialize)]
pub struct MvOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub from: String,
    pub to: String,
}

/// Output for `export` command.
#[derive(Debug, Serialize)]
pub struct ExportOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub archive: String,
    pub entries: Vec<String>,
}

/// Output for `gc` command.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub project: ProjectInfo,
    pub dry_run: bool,
    #[serde(flatten)]
    pub stats: GcStats,
}
