//! JSON Schema validation for setup documents and flat record files.
//!
//! Schemas live as draft 2020-12 files under `schemas/`, one file per
//! entity, stitched together with relative `$ref`s. References are
//! resolved against the schema file's own directory through a file
//! retriever, and every violation found in an instance is reported, not
//! just the first.

use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::{Draft, Retrieve, Uri, Validator};
use serde_json::Value;
use url::Url;

use crate::error::{SchemaError, SchemaResult, Violation, ViolationSet};

/// File name of the nested setup-tree schema.
pub const SETUP_SCHEMA: &str = "setup.schema.json";
/// File name of the flat device/gateway record schema.
pub const RECORDS_SCHEMA: &str = "records.schema.json";

/// Which of the shipped schemas an input validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// The full nested setup document.
    Setup,
    /// Flat device/gateway records (JSON array, JSON-Lines, CSV).
    Records,
}

impl SchemaKind {
    /// Pick a schema from the input file name: anything with "setup" in
    /// its stem is a setup tree, everything else is flat records.
    pub fn detect(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem.contains("setup") {
            SchemaKind::Setup
        } else {
            SchemaKind::Records
        }
    }
}

/// Resolves `file://` schema references from disk.
struct FileRetriever;

impl Retrieve for FileRetriever {
    fn retrieve(
        &self,
        uri: &Uri<String>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let url = Url::parse(uri.as_str())?;
        if url.scheme() != "file" {
            return Err(format!("unsupported $ref scheme in {}", uri.as_str()).into());
        }
        let path = url
            .to_file_path()
            .map_err(|_| format!("invalid file reference {}", uri.as_str()))?;
        let text = fs::read_to_string(&path)?;
        let mut schema: Value = serde_json::from_str(&text)?;
        if let Some(obj) = schema.as_object_mut() {
            // Anchor the fetched schema to its own location so that its
            // relative $refs keep resolving from the same directory.
            obj.entry("$id")
                .or_insert_with(|| Value::String(uri.as_str().to_string()));
        }
        Ok(schema)
    }
}

/// Immutable set of compiled validators, constructed once and passed by
/// reference wherever validation happens.
#[derive(Debug)]
pub struct SchemaRegistry {
    setup: Validator,
    records: Validator,
    records_raw: Value,
    dir: PathBuf,
}

impl SchemaRegistry {
    /// Load and compile the schema files found in `dir`.
    pub fn from_dir(dir: &Path) -> SchemaResult<Self> {
        let (setup, _) = compile(&dir.join(SETUP_SCHEMA))?;
        let (records, records_raw) = compile(&dir.join(RECORDS_SCHEMA))?;
        Ok(Self {
            setup,
            records,
            records_raw,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validator(&self, kind: SchemaKind) -> &Validator {
        match kind {
            SchemaKind::Setup => &self.setup,
            SchemaKind::Records => &self.records,
        }
    }

    /// Validate one instance, collecting every violation.
    pub fn validate(&self, kind: SchemaKind, instance: &Value) -> SchemaResult<()> {
        let violations: Vec<Violation> = self
            .validator(kind)
            .iter_errors(instance)
            .map(|e| Violation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Violations(ViolationSet { violations }))
        }
    }

    pub fn validate_setup(&self, document: &Value) -> SchemaResult<()> {
        self.validate(SchemaKind::Setup, document)
    }

    pub fn validate_record(&self, record: &Value) -> SchemaResult<()> {
        self.validate(SchemaKind::Records, record)
    }

    /// Declared type of a flat-record property, for CSV coercion.
    ///
    /// Walks the record schema's `oneOf` branches, following one level
    /// of `$ref` into sibling schema files, and returns the first
    /// non-null `type` found for the property.
    pub fn record_property_type(&self, key: &str) -> Option<String> {
        let branches = self.records_raw.get("oneOf")?.as_array()?;
        for branch in branches {
            let resolved: Option<Value> = branch
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|reference| fs::read_to_string(self.dir.join(reference)).ok())
                .and_then(|text| serde_json::from_str(&text).ok());
            let branch = resolved.as_ref().unwrap_or(branch);
            if let Some(declared) = branch
                .get("properties")
                .and_then(|p| p.get(key))
                .and_then(|p| p.get("type"))
            {
                match declared {
                    Value::String(t) => return Some(t.clone()),
                    Value::Array(ts) => {
                        for t in ts {
                            if let Some(t) = t.as_str() {
                                if t != "null" {
                                    return Some(t.to_string());
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

/// Compile one schema file, anchoring it to its location on disk so
/// relative `$ref`s resolve against the file's own directory.
fn compile(path: &Path) -> SchemaResult<(Validator, Value)> {
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| SchemaError::Load {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let mut schema: Value = serde_json::from_str(&text).map_err(|e| SchemaError::Load {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let canonical = fs::canonicalize(path).map_err(|e| SchemaError::Load {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let base = Url::from_file_path(&canonical)
        .map_err(|_| SchemaError::Compile(format!("cannot derive a base URI for {display}")))?;
    if let Some(obj) = schema.as_object_mut() {
        obj.entry("$id")
            .or_insert_with(|| Value::String(base.to_string()));
    }

    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .with_retriever(FileRetriever)
        .build(&schema)
        .map_err(|e| SchemaError::Compile(e.to_string()))?;
    Ok((validator, schema))
}
