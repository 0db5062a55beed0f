//! Decomposition of the nested setup tree into flat, per-kind lists.
//!
//! A single pass over `tenants[]` copies every nested gateway,
//! application and device profile into its own list, injecting the
//! owning tenant's identifier (or null when the tenant has none yet) as
//! the parent reference, and produces a "clean" tenant record with the
//! nested arrays stripped. The caller's document is never mutated; every
//! record carries a [`NodePath`] breadcrumb back to its source node so
//! the engine can backfill identifiers explicitly.

use std::fmt;

use serde_json::{Map, Value};

use crate::document::{NodePath, SetupDocument};
use crate::error::{DocumentError, DocumentResult};

/// Child arrays stripped from a tenant during decomposition.
const TENANT_CHILD_KEYS: [&str; 3] = ["gateways", "applications", "device_profiles"];

/// Entity kinds known to the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Tenant,
    User,
    DeviceProfileTemplate,
    Gateway,
    DeviceProfile,
    Application,
    Integration,
    Device,
    DeviceKeys,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "tenant",
            EntityKind::User => "user",
            EntityKind::DeviceProfileTemplate => "device_profile_template",
            EntityKind::Gateway => "gateway",
            EntityKind::DeviceProfile => "device_profile",
            EntityKind::Application => "application",
            EntityKind::Integration => "integration",
            EntityKind::Device => "device",
            EntityKind::DeviceKeys => "device_keys",
        }
    }

    /// Document field holding this kind's identifier.
    pub fn id_field(&self) -> &'static str {
        match self {
            EntityKind::Gateway => "gatewayId",
            EntityKind::Device | EntityKind::DeviceKeys => "dev_eui",
            _ => "id",
        }
    }

}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One flattened entity: its attribute bag, identifier, parent
/// reference, and the breadcrumb back to its document node.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub attrs: Map<String, Value>,
    /// Identifier read from the input, or resolved during the run.
    pub id: Option<String>,
    /// Identifier of the tenant this entity was nested under; `None`
    /// for top-level kinds and for children whose tenant is unresolved.
    pub tenant_id: Option<String>,
    pub path: NodePath,
}

impl EntityRecord {
    fn new(kind: EntityKind, attrs: Map<String, Value>, path: NodePath) -> Self {
        let id = attrs
            .get(kind.id_field())
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            kind,
            attrs,
            id,
            tenant_id: None,
            path,
        }
    }

    /// Identifying label for logs: display name, then natural key.
    pub fn label(&self) -> &str {
        self.attrs
            .get("name")
            .or_else(|| self.attrs.get("email"))
            .or_else(|| self.attrs.get(self.kind.id_field()))
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }
}

/// Flat, per-kind view of one setup document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupPlan {
    pub tenants: Vec<EntityRecord>,
    pub users: Vec<EntityRecord>,
    pub device_profile_templates: Vec<EntityRecord>,
    pub gateways: Vec<EntityRecord>,
    pub applications: Vec<EntityRecord>,
    pub device_profiles: Vec<EntityRecord>,
}

/// Flatten the document into dependency-ordered entity lists.
pub fn decompose(doc: &SetupDocument) -> DocumentResult<SetupPlan> {
    let mut plan = SetupPlan::default();

    for (i, record) in top_level_array(doc, "users")?.iter().enumerate() {
        let attrs = as_object(record, &NodePath::root().key("users").index(i))?;
        plan.users.push(EntityRecord::new(
            EntityKind::User,
            attrs.clone(),
            NodePath::root().key("users").index(i),
        ));
    }

    for (i, record) in top_level_array(doc, "device_profile_templates")?
        .iter()
        .enumerate()
    {
        let path = NodePath::root().key("device_profile_templates").index(i);
        let attrs = as_object(record, &path)?;
        plan.device_profile_templates.push(EntityRecord::new(
            EntityKind::DeviceProfileTemplate,
            attrs.clone(),
            path,
        ));
    }

    for (i, tenant) in top_level_array(doc, "tenants")?.iter().enumerate() {
        let tenant_path = NodePath::root().key("tenants").index(i);
        let attrs = as_object(tenant, &tenant_path)?;
        let tenant_id = attrs.get("id").and_then(Value::as_str).map(str::to_string);

        for (child_key, kind, out) in [
            ("gateways", EntityKind::Gateway, &mut plan.gateways),
            ("applications", EntityKind::Application, &mut plan.applications),
            (
                "device_profiles",
                EntityKind::DeviceProfile,
                &mut plan.device_profiles,
            ),
        ] {
            for (j, child) in nested_array(attrs, child_key, &tenant_path)?
                .iter()
                .enumerate()
            {
                let child_path = tenant_path.clone().key(child_key).index(j);
                let child_attrs = as_object(child, &child_path)?;
                let mut record = EntityRecord::new(kind, child_attrs.clone(), child_path);
                record.tenant_id = tenant_id.clone();
                out.push(record);
            }
        }

        // Clean tenant record: nested child arrays stripped, everything
        // else (including unrecognized keys) passed through unchanged.
        let mut clean = attrs.clone();
        for key in TENANT_CHILD_KEYS {
            clean.remove(key);
        }
        plan.tenants
            .push(EntityRecord::new(EntityKind::Tenant, clean, tenant_path));
    }

    Ok(plan)
}

fn top_level_array<'a>(doc: &'a SetupDocument, key: &str) -> DocumentResult<&'a [Value]> {
    match doc.root().get(key) {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(DocumentError::UnexpectedShape {
            path: format!("/{key}"),
            expected: "array".to_string(),
        }),
    }
}

fn nested_array<'a>(
    parent: &'a Map<String, Value>,
    key: &str,
    parent_path: &NodePath,
) -> DocumentResult<&'a [Value]> {
    match parent.get(key) {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(DocumentError::UnexpectedShape {
            path: format!("{parent_path}/{key}"),
            expected: "array".to_string(),
        }),
    }
}

fn as_object<'a>(value: &'a Value, path: &NodePath) -> DocumentResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| DocumentError::UnexpectedShape {
        path: path.to_string(),
        expected: "object".to_string(),
    })
}
