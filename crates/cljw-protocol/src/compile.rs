//! The compile request carried in argument 0 of every work request.

use serde::{Deserialize, Serialize};

use crate::error::WorkError;

/// A single compile request.
///
/// Field names are lower-case-with-dashes on the wire. The classpath is
/// ordered: earlier entries shadow later ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompileRequest {
    /// Namespaces to compile ahead of time.
    #[serde(default)]
    pub aot: Vec<String>,
    /// Directory receiving generated class files.
    pub classes_dir: String,
    /// Ordered classpath: directories and/or archives.
    #[serde(default)]
    pub classpath: Vec<String>,
    /// Archive to produce.
    pub output_jar: String,
    /// Root directory of the sources, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_dir: Option<String>,
    /// Source files belonging to this unit.
    #[serde(default)]
    pub srcs: Vec<String>,
}

impl CompileRequest {
    /// Parse and validate a compile request from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, WorkError> {
        let request: CompileRequest = serde_json::from_str(json)
            .map_err(|e| WorkError::invalid_request(format!("invalid compile request: {}", e)))?;
        request.validate()?;
        Ok(request)
    }

    /// Decode the compile request from work request arguments.
    pub fn from_arguments(arguments: &[String]) -> Result<Self, WorkError> {
        let payload = arguments
            .first()
            .ok_or_else(|| WorkError::invalid_request("missing compile request argument"))?;
        Self::from_json(payload)
    }

    /// Check field-level constraints serde cannot express.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.classes_dir.is_empty() {
            return Err(WorkError::invalid_request("classes-dir must not be empty"));
        }
        if self.output_jar.is_empty() {
            return Err(WorkError::invalid_request("output-jar must not be empty"));
        }
        if let Some(index) = self.classpath.iter().position(|entry| entry.is_empty()) {
            return Err(WorkError::with_data(
                crate::ErrorCode::InvalidRequest,
                format!("classpath entry {} is empty", index),
                serde_json::json!({ "field": "classpath", "index": index }),
            ));
        }
        if let Some(index) = self.aot.iter().position(|ns| ns.trim().is_empty()) {
            return Err(WorkError::with_data(
                crate::ErrorCode::InvalidRequest,
                format!("aot entry {} is empty", index),
                serde_json::json!({ "field": "aot", "index": index }),
            ));
        }
        Ok(())
    }
}
