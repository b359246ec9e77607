//! Schema Registry - Versioned Conformance Contracts
//!
//! A schema is declared as JSON in JSON-Schema shape, compiled once at
//! startup, and read-only from then on. Compilation is the only place the
//! definition text is interpreted; the classifier only ever sees a `Schema`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hashing::compute_schema_digest;

/// Embedded definition of schema v2.
pub const SCHEMA_V2: &str = include_str!("../schemas/v2.json");

pub const DEFAULT_SCHEMA_VERSION: &str = "v2";

pub type SchemaVersion = String;

#[derive(Debug, Error)]
pub enum SchemaCompilationError {
    #[error("Malformed schema definition: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Schema version must not be empty")]
    MissingVersion,

    #[error("Schema {version}: root type must be \"object\", found \"{found}\"")]
    RootNotObject { version: String, found: String },

    #[error("Schema {version}: property {key} has unsupported type \"{found}\"")]
    UnsupportedType { version: String, key: String, found: String },

    #[error("Schema {version}: property {key} declares an empty enum")]
    EmptyEnum { version: String, key: String },

    #[error("Schema {version}: required key {key} is not a declared property")]
    UnknownRequired { version: String, key: String },

    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Textual form of a schema, as written in `schemas/*.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDefinition {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub meta_schema: Option<String>,
    pub version: SchemaVersion,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

/// Value constraint for one recognized key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Constraint {
    /// Any string, including the empty one.
    FreeForm,
    /// Closed set; declared order is kept for display.
    OneOf(Vec<String>),
}

impl Constraint {
    pub fn admits(&self, value: &str) -> bool {
        match self {
            Constraint::FreeForm => true,
            Constraint::OneOf(values) => values.iter().any(|v| v == value),
        }
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        match self {
            Constraint::FreeForm => None,
            Constraint::OneOf(values) => Some(values),
        }
    }
}

/// Compiled, immutable schema.
#[derive(Debug, Clone)]
pub struct Schema {
    version: SchemaVersion,
    title: String,
    documentation: Option<String>,
    digest: String,
    required: Vec<String>,
    constraints: BTreeMap<String, Constraint>,
}

/// Compile a schema definition from its JSON text.
pub fn compile(definition: &str) -> Result<Schema, SchemaCompilationError> {
    Schema::compile(definition)
}

impl Schema {
    pub fn compile(definition: &str) -> Result<Self, SchemaCompilationError> {
        let definition: SchemaDefinition = serde_json::from_str(definition)?;
        Self::from_definition(definition)
    }

    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, SchemaCompilationError> {
        let version = definition.version.trim().to_string();
        if version.is_empty() {
            return Err(SchemaCompilationError::MissingVersion);
        }

        if definition.kind != "object" {
            return Err(SchemaCompilationError::RootNotObject {
                version,
                found: definition.kind.clone(),
            });
        }

        let mut constraints = BTreeMap::new();
        for (key, property) in &definition.properties {
            if property.kind != "string" {
                return Err(SchemaCompilationError::UnsupportedType {
                    version,
                    key: key.clone(),
                    found: property.kind.clone(),
                });
            }

            let constraint = match &property.allowed {
                None => Constraint::FreeForm,
                Some(values) if values.is_empty() => {
                    return Err(SchemaCompilationError::EmptyEnum {
                        version,
                        key: key.clone(),
                    });
                }
                Some(values) => Constraint::OneOf(values.clone()),
            };
            constraints.insert(key.clone(), constraint);
        }

        let mut required: Vec<String> = Vec::with_capacity(definition.required.len());
        for key in &definition.required {
            if !constraints.contains_key(key) {
                return Err(SchemaCompilationError::UnknownRequired {
                    version,
                    key: key.clone(),
                });
            }
            if !required.contains(key) {
                required.push(key.clone());
            }
        }

        let digest = compute_schema_digest(&definition)?;
        let title = definition
            .title
            .clone()
            .unwrap_or_else(|| format!("Schema {}", version));

        tracing::debug!(
            schema = %version,
            digest = %digest,
            properties = constraints.len(),
            required = required.len(),
            "compiled schema"
        );

        Ok(Self {
            version,
            title,
            documentation: definition.documentation,
            digest,
            required,
            constraints,
        })
    }

    /// The embedded v2 schema.
    pub fn builtin_v2() -> Result<Self, SchemaCompilationError> {
        Self::compile(SCHEMA_V2)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Required keys in declared order.
    pub fn required_keys(&self) -> &[String] {
        &self.required
    }

    pub fn is_required(&self, key: &str) -> bool {
        self.required.iter().any(|k| k == key)
    }

    pub fn is_recognized(&self, key: &str) -> bool {
        self.constraints.contains_key(key)
    }

    pub fn constraint(&self, key: &str) -> Option<&Constraint> {
        self.constraints.get(key)
    }

    pub fn recognized_keys(&self) -> impl Iterator<Item = &str> {
        self.constraints.keys().map(String::as_str)
    }
}

/// Schema registry - holds every compiled schema by version
pub struct SchemaRegistry {
    schemas: HashMap<SchemaVersion, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self { schemas: HashMap::new() }
    }

    /// Registry holding the embedded schemas only.
    pub fn builtin() -> Result<Self, SchemaCompilationError> {
        let mut registry = Self::new();
        registry.register(Schema::builtin_v2()?);
        Ok(registry)
    }

    /// Builtin schemas plus every `*.json` definition in `dir`.
    ///
    /// A file declaring an already-registered version replaces it. Any file
    /// that fails to compile fails the whole load.
    pub fn load_from_dir(dir: &Path) -> Result<Self, SchemaCompilationError> {
        let mut registry = Self::builtin()?;
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "schema directory does not exist, using builtin schemas");
            return Ok(registry);
        }

        let io_err = |source: std::io::Error| SchemaCompilationError::Io { path: dir.to_path_buf(), source };
        let mut paths = vec![];
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().map_or(false, |e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path)
                .map_err(|source| SchemaCompilationError::Io { path: path.clone(), source })?;
            let schema = Schema::compile(&content)?;
            tracing::info!(schema = %schema.version(), path = %path.display(), "loaded schema");
            registry.register(schema);
        }

        Ok(registry)
    }

    pub fn get(&self, version: &str) -> Option<&Schema> {
        self.schemas.get(version)
    }

    /// All schemas, ordered by version.
    pub fn list(&self) -> Vec<&Schema> {
        let mut schemas: Vec<_> = self.schemas.values().collect();
        schemas.sort_by(|a, b| a.version.cmp(&b.version));
        schemas
    }

    pub fn register(&mut self, schema: Schema) {
        if self.schemas.contains_key(&schema.version) {
            tracing::warn!(schema = %schema.version, "replacing registered schema");
        }
        self.schemas.insert(schema.version.clone(), schema);
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
