//! The setup document and its addressing.
//!
//! The document is the sole durable store: identifiers resolved during a
//! run are written back into the exact tree position they were read
//! from, and the whole document is rewritten atomically at the end.
//! Flattened entity records carry a [`NodePath`] breadcrumb back to
//! their node, so backfill is an explicit set-at-path operation rather
//! than aliased mutation of nested maps.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{DocumentError, DocumentResult};

/// One step of a breadcrumb: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// Breadcrumb from the document root to one node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePath {
    steps: Vec<Step>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: &str) -> Self {
        self.steps.push(Step::Key(key.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.steps.push(Step::Index(index));
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Array index of the second step, when the path points under a
    /// top-level collection (`/tenants/3/...` → `Some(3)`).
    pub fn top_level_ordinal(&self) -> Option<usize> {
        match self.steps.get(1) {
            Some(Step::Index(i)) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "/");
        }
        for step in &self.steps {
            match step {
                Step::Key(k) => write!(f, "/{k}")?,
                Step::Index(i) => write!(f, "/{i}")?,
            }
        }
        Ok(())
    }
}

/// A parsed setup document.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDocument {
    root: Value,
}

impl SetupDocument {
    /// Wrap a parsed value. The root must be a JSON object.
    pub fn from_value(root: Value) -> DocumentResult<Self> {
        if !root.is_object() {
            return Err(DocumentError::UnexpectedShape {
                path: "/".to_string(),
                expected: "object".to_string(),
            });
        }
        Ok(Self { root })
    }

    pub fn from_file(path: &Path) -> DocumentResult<Self> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|_| DocumentError::NotFound {
            path: display.clone(),
        })?;
        let root: Value = serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
            path: display,
            source,
        })?;
        Self::from_value(root)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &NodePath) -> Option<&Value> {
        let mut node = &self.root;
        for step in path.steps() {
            node = match step {
                Step::Key(k) => node.get(k)?,
                Step::Index(i) => node.get(i)?,
            };
        }
        Some(node)
    }

    fn get_mut(&mut self, path: &NodePath) -> Option<&mut Value> {
        let mut node = &mut self.root;
        for step in path.steps() {
            node = match step {
                Step::Key(k) => node.get_mut(k)?,
                Step::Index(i) => node.get_mut(i)?,
            };
        }
        Some(node)
    }

    /// Set one field on the object addressed by `path`.
    pub fn set_field(&mut self, path: &NodePath, key: &str, value: Value) -> DocumentResult<()> {
        let node = self
            .get_mut(path)
            .ok_or_else(|| DocumentError::PathNotFound {
                path: path.to_string(),
            })?;
        let obj = node
            .as_object_mut()
            .ok_or_else(|| DocumentError::UnexpectedShape {
                path: path.to_string(),
                expected: "object".to_string(),
            })?;
        obj.insert(key.to_string(), value);
        Ok(())
    }

    /// Backfill a resolved identifier at its source position.
    pub fn set_id(&mut self, path: &NodePath, id: &str) -> DocumentResult<()> {
        self.set_field(path, "id", Value::String(id.to_string()))
    }

    /// Persist the document, atomically with respect to process crash:
    /// serialize into a temporary file in the target's directory, then
    /// rename over the target.
    pub fn write_atomic(&self, path: &Path) -> DocumentResult<()> {
        let display = path.display().to_string();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|source| DocumentError::Write {
            path: display.clone(),
            source,
        })?;

        let text = serde_json::to_string_pretty(&self.root).expect("document is valid JSON");
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.flush())
            .map_err(|source| DocumentError::Write {
                path: display.clone(),
                source,
            })?;

        tmp.persist(path).map_err(|e| DocumentError::Write {
            path: display,
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> SetupDocument {
        SetupDocument::from_value(json!({
            "tenants": [
                {"name": "T", "gateways": [{"gatewayId": "0102030405060708"}]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn path_display_uses_json_pointer_shape() {
        let path = NodePath::root().key("tenants").index(0).key("gateways").index(1);
        assert_eq!(path.to_string(), "/tenants/0/gateways/1");
        assert_eq!(NodePath::root().to_string(), "/");
    }

    #[test]
    fn set_id_backfills_at_source_position() {
        let mut doc = sample();
        let path = NodePath::root().key("tenants").index(0);
        doc.set_id(&path, "t-1").unwrap();
        assert_eq!(doc.root()["tenants"][0]["id"], "t-1");
        // Sibling nodes are untouched.
        assert_eq!(
            doc.root()["tenants"][0]["gateways"][0]["gatewayId"],
            "0102030405060708"
        );
    }

    #[test]
    fn set_id_rejects_missing_path() {
        let mut doc = sample();
        let path = NodePath::root().key("tenants").index(7);
        let err = doc.set_id(&path, "t-1").unwrap_err();
        assert!(matches!(err, DocumentError::PathNotFound { .. }));
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = SetupDocument::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, DocumentError::UnexpectedShape { .. }));
    }

    #[test]
    fn write_atomic_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("setup.json");
        let doc = sample();
        doc.write_atomic(&target).unwrap();
        let reread = SetupDocument::from_file(&target).unwrap();
        assert_eq!(reread.root(), doc.root());
    }
}
