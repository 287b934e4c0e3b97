//! Request file parsing.
//!
//! Requests arrive as JSON from the HTTP and queue adapters, and as YAML or
//! JSON files from the command line.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StackError};

use super::spec::RequestInput;

/// Parser for request documents.
#[derive(Debug, Default)]
pub struct RequestParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl RequestParser {
    /// Creates a new request parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a request from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RequestInput> {
        let path = self.resolve(path.as_ref());
        info!("Loading request from: {}", path.display());

        if !path.exists() {
            return Err(StackError::Configuration(ConfigError::FileNotFound { path }));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            StackError::Configuration(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: path.display().to_string(),
            })
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let location = path.display().to_string();

        if is_json {
            Self::parse_json(&content, &location)
        } else {
            Self::parse_yaml(&content, &location)
        }
    }

    /// Parses a request from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(content: &str, location: &str) -> Result<RequestInput> {
        debug!("Parsing YAML request");
        serde_yaml::from_str(content).map_err(|e| {
            StackError::Configuration(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: location.to_string(),
            })
        })
    }

    /// Parses a request from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn parse_json(content: &str, location: &str) -> Result<RequestInput> {
        debug!("Parsing JSON request");
        serde_json::from_str(content).map_err(|e| {
            StackError::Configuration(ConfigError::ParseError {
                message: format!("JSON parse error: {e}"),
                location: location.to_string(),
            })
        })
    }

    fn resolve(&self, path: &Path) -> std::path::PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
