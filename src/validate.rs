//! Validate-only mode: check files against the shipped schemas without
//! touching the server.
//!
//! Setup documents are validated whole; flat record files (one device
//! or gateway per entry) may be a JSON array, JSON-Lines, or CSV. CSV
//! cells are strings, so values are coerced to the type the schema
//! declares for their column before validation; a cell that will not
//! coerce is left as the raw string and the schema reports the
//! mismatch.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{DocumentError, Result, SchemaError, Violation, ViolationSet};
use crate::schema::{SchemaKind, SchemaRegistry};

/// Input encodings accepted in validate-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    JsonLines,
    Csv,
}

impl InputFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("json") => Some(InputFormat::Json),
            Some("jsonl") => Some(InputFormat::JsonLines),
            Some("csv") => Some(InputFormat::Csv),
            _ => None,
        }
    }
}

/// One invalid record and everything wrong with it.
#[derive(Debug)]
pub struct RecordFailure {
    /// 1-based entry or line number within the input file.
    pub line: usize,
    pub violations: ViolationSet,
}

/// Outcome of validating one file.
#[derive(Debug, Default)]
pub struct FileReport {
    pub total: usize,
    pub failures: Vec<RecordFailure>,
}

impl FileReport {
    pub fn valid(&self) -> usize {
        self.total - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn check(&mut self, registry: &SchemaRegistry, kind: SchemaKind, line: usize, value: &Value) {
        self.total += 1;
        if let Err(SchemaError::Violations(violations)) = registry.validate(kind, value) {
            self.failures.push(RecordFailure { line, violations });
        }
    }

    fn unparseable(&mut self, line: usize, message: String) {
        self.total += 1;
        self.failures.push(RecordFailure {
            line,
            violations: ViolationSet {
                violations: vec![Violation {
                    path: String::new(),
                    message,
                }],
            },
        });
    }
}

/// Validate one file against the selected schema.
pub fn validate_file(
    registry: &SchemaRegistry,
    kind: SchemaKind,
    path: &Path,
) -> Result<FileReport> {
    let format = InputFormat::detect(path).ok_or_else(|| DocumentError::UnexpectedShape {
        path: path.display().to_string(),
        expected: "a .json, .jsonl or .csv file".to_string(),
    })?;

    if kind == SchemaKind::Setup && format != InputFormat::Json {
        return Err(DocumentError::UnexpectedShape {
            path: path.display().to_string(),
            expected: "setup documents must be JSON".to_string(),
        }
        .into());
    }

    let mut report = FileReport::default();
    match format {
        InputFormat::Json => validate_json(registry, kind, path, &mut report)?,
        InputFormat::JsonLines => validate_jsonl(registry, kind, path, &mut report)?,
        InputFormat::Csv => validate_csv(registry, kind, path, &mut report)?,
    }
    Ok(report)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|_| {
            DocumentError::NotFound {
                path: path.display().to_string(),
            }
            .into()
        })
}

fn validate_json(
    registry: &SchemaRegistry,
    kind: SchemaKind,
    path: &Path,
    report: &mut FileReport,
) -> Result<()> {
    let text = read_text(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    match (kind, value) {
        // A setup document is one entry, whatever its size.
        (SchemaKind::Setup, value) => report.check(registry, kind, 1, &value),
        (SchemaKind::Records, Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                report.check(registry, kind, i + 1, item);
            }
        }
        (SchemaKind::Records, single) => report.check(registry, kind, 1, &single),
    }
    Ok(())
}

fn validate_jsonl(
    registry: &SchemaRegistry,
    kind: SchemaKind,
    path: &Path,
    report: &mut FileReport,
) -> Result<()> {
    let text = read_text(path)?;
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => report.check(registry, kind, line_no, &value),
            Err(err) => report.unparseable(line_no, format!("invalid JSON: {err}")),
        }
    }
    Ok(())
}

fn validate_csv(
    registry: &SchemaRegistry,
    kind: SchemaKind,
    path: &Path,
    report: &mut FileReport,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(path).map_err(|_| DocumentError::NotFound {
        path: path.display().to_string(),
    })?;
    let headers = reader
        .headers()
        .map_err(|e| DocumentError::UnexpectedShape {
            path: path.display().to_string(),
            expected: format!("CSV with a header row: {e}"),
        })?
        .clone();

    for (i, row) in reader.records().enumerate() {
        let line_no = i + 1;
        match row {
            Ok(row) => {
                let mut entity = Map::new();
                for (key, raw) in headers.iter().zip(row.iter()) {
                    if raw.is_empty() {
                        continue;
                    }
                    entity.insert(key.to_string(), coerce(registry, key, raw));
                }
                report.check(registry, kind, line_no, &Value::Object(entity));
            }
            Err(err) => report.unparseable(line_no, format!("invalid CSV row: {err}")),
        }
    }
    Ok(())
}

/// Coerce a CSV cell to the type the record schema declares for its
/// column. Unknown columns and unconvertible values stay strings.
fn coerce(registry: &SchemaRegistry, key: &str, raw: &str) -> Value {
    match registry.record_property_type(key).as_deref() {
        Some("boolean") => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        Some("integer") => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some("number") => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn registry() -> SchemaRegistry {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas");
        SchemaRegistry::from_dir(&dir).unwrap()
    }

    #[test]
    fn format_detection_follows_the_extension() {
        assert_eq!(
            InputFormat::detect(Path::new("x/devices.jsonl")),
            Some(InputFormat::JsonLines)
        );
        assert_eq!(
            InputFormat::detect(Path::new("gw.CSV")),
            Some(InputFormat::Csv)
        );
        assert_eq!(InputFormat::detect(Path::new("notes.txt")), None);
    }

    #[test]
    fn csv_booleans_and_integers_are_coerced() {
        let registry = registry();
        assert_eq!(coerce(&registry, "skipFcntCheck", "yes"), Value::Bool(true));
        assert_eq!(coerce(&registry, "statsInterval", "30"), Value::from(30));
        // A cell the schema types as integer but that will not parse
        // stays a string so validation can flag it.
        assert_eq!(
            coerce(&registry, "statsInterval", "soon"),
            Value::String("soon".to_string())
        );
        assert_eq!(
            coerce(&registry, "name", "42"),
            Value::String("42".to_string())
        );
    }
}
