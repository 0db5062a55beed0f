//! Declarative provisioning for a ChirpStack-compatible network server.
//!
//! A single JSON setup document describes tenants with their nested
//! gateways, applications, device profiles and devices, plus global
//! users and device profile templates. This crate validates the
//! document against JSON Schemas, flattens the tenant tree into
//! dependency-ordered entity records, creates them through the remote
//! management API, and writes server-assigned identifiers back into the
//! document — so running the same document twice reuses what already
//! exists instead of recreating it.
//!
//! Pipeline: document → [`schema::SchemaRegistry`] →
//! [`decompose::decompose`] → [`engine::ProvisioningEngine`] →
//! [`document::SetupDocument::write_atomic`].

pub mod api;
pub mod backup;
pub mod decompose;
pub mod document;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod validate;

pub use api::{HttpApi, MockApi, ProvisioningApi};
pub use decompose::{decompose, EntityKind, EntityRecord, SetupPlan};
pub use document::{NodePath, SetupDocument};
pub use engine::{ProvisioningEngine, RunReport};
pub use error::{ApiError, DocumentError, ProvisionError, Result, SchemaError};
pub use schema::{SchemaKind, SchemaRegistry};
pub use settings::Settings;
