//! Unit Manifest (unit.json)
//!
//! Describes a dynamic unit to the host: the library file to open, the
//! optional one-time init symbol, and the exported entry points with their
//! arities.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

use crate::value::MAX_ARITY;

/// Manifest error types.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Validation(String),
}

/// Unit manifest (unit.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Unit name.
    pub name: String,

    /// Library file to open: a path or a bare name for the search path.
    pub library: String,

    /// Brief description.
    #[serde(default)]
    pub description: String,

    /// Symbol to run once before any export is invoked, if the unit
    /// requires setup.
    #[serde(default)]
    pub init: Option<String>,

    /// Exported entry points.
    #[serde(default)]
    pub exports: Vec<UnitExport>,
}

impl UnitManifest {
    /// Create a manifest with the required fields.
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
            description: String::new(),
            init: None,
            exports: Vec::new(),
        }
    }

    /// Set the init symbol.
    pub fn with_init(mut self, symbol: impl Into<String>) -> Self {
        self.init = Some(symbol.into());
        self
    }

    /// Add an export.
    pub fn add_export(&mut self, export: UnitExport) {
        self.exports.push(export);
    }

    /// Get an export by name.
    pub fn export(&self, name: &str) -> Option<&UnitExport> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Load a manifest from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Save the manifest to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let file = File::create(path.as_ref())?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check structural invariants: a library file, unique export names,
    /// arities within the dispatch bound.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.library.is_empty() {
            return Err(ManifestError::Validation(
                "manifest names no library file".to_string(),
            ));
        }

        for (i, export) in self.exports.iter().enumerate() {
            if export.arity > MAX_ARITY {
                return Err(ManifestError::Validation(format!(
                    "export '{}' has arity {}, maximum is {}",
                    export.name, export.arity, MAX_ARITY
                )));
            }
            if self.exports[..i].iter().any(|e| e.name == export.name) {
                return Err(ManifestError::Validation(format!(
                    "duplicate export '{}'",
                    export.name
                )));
            }
        }

        Ok(())
    }
}

/// Exported entry point definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitExport {
    /// Symbol name.
    pub name: String,

    /// Number of boxed arguments the entry point takes.
    pub arity: usize,

    /// Brief description.
    #[serde(default)]
    pub description: String,
}

impl UnitExport {
    /// Create an export.
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}
