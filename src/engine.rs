//! Dependency-ordered provisioning engine.
//!
//! Entities are submitted in the fixed topological order
//! tenant → { gateway, device profile } → application → integration →
//! device → device keys, with users and device profile templates as
//! independent top-level kinds. A child is only submitted once its
//! parent holds an identifier, because the child's create request must
//! carry it. Identifiers resolved by the server are written into both
//! the flat record and the original document node.
//!
//! Failure policy: one entity's failed creation never aborts the run —
//! it is logged, counted, and its own children are skipped. The single
//! exception is an authentication failure, after which no further
//! submission can succeed and none is attempted.

use std::collections::HashMap;
use std::fmt;
use std::fs;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::api::{JsonMap, ProvisioningApi};
use crate::decompose::{decompose, EntityKind, EntityRecord};
use crate::document::SetupDocument;
use crate::error::{ApiError, ApiResult, Result};
use crate::registry::{self, BuiltRequest};

/// Display order for the run summary.
pub const KIND_ORDER: [EntityKind; 9] = [
    EntityKind::Tenant,
    EntityKind::User,
    EntityKind::DeviceProfileTemplate,
    EntityKind::Gateway,
    EntityKind::DeviceProfile,
    EntityKind::Application,
    EntityKind::Integration,
    EntityKind::Device,
    EntityKind::DeviceKeys,
];

/// Outcome counters for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub created: usize,
    pub reused: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl KindCounts {
    fn is_empty(&self) -> bool {
        self.created == 0 && self.reused == 0 && self.failed == 0 && self.skipped == 0
    }
}

/// Per-kind outcome of one provisioning run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    counts: HashMap<EntityKind, KindCounts>,
    /// Set when the run was halted by an authentication failure.
    pub fatal: Option<String>,
}

impl RunReport {
    pub fn counts(&self, kind: EntityKind) -> KindCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_failed(&self) -> usize {
        self.counts.values().map(|c| c.failed).sum()
    }

    pub fn total_created(&self) -> usize {
        self.counts.values().map(|c| c.created).sum()
    }

    /// True when nothing failed and the run was not halted.
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none() && self.total_failed() == 0
    }

    fn created(&mut self, kind: EntityKind) {
        self.counts.entry(kind).or_default().created += 1;
    }

    fn reused(&mut self, kind: EntityKind) {
        self.counts.entry(kind).or_default().reused += 1;
    }

    fn failed(&mut self, kind: EntityKind) {
        self.counts.entry(kind).or_default().failed += 1;
    }

    fn skipped(&mut self, kind: EntityKind) {
        self.counts.entry(kind).or_default().skipped += 1;
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in KIND_ORDER {
            let c = self.counts(kind);
            if c.is_empty() {
                continue;
            }
            writeln!(
                f,
                "  {:<24} {} created, {} reused, {} failed, {} skipped",
                kind, c.created, c.reused, c.failed, c.skipped
            )?;
        }
        if let Some(fatal) = &self.fatal {
            writeln!(f, "  run halted: {fatal}")?;
        }
        Ok(())
    }
}

/// Drives one provisioning run against a [`ProvisioningApi`].
pub struct ProvisioningEngine<'a> {
    api: &'a dyn ProvisioningApi,
    report: RunReport,
    halted: bool,
}

impl<'a> ProvisioningEngine<'a> {
    pub fn new(api: &'a dyn ProvisioningApi) -> Self {
        Self {
            api,
            report: RunReport::default(),
            halted: false,
        }
    }

    /// Provision everything in `doc`, backfilling resolved identifiers
    /// into it. The document is always left in a rewritable state, even
    /// when the run is halted partway.
    pub async fn run(mut self, doc: &mut SetupDocument) -> Result<RunReport> {
        let mut plan = decompose(doc)?;
        info!(
            tenants = plan.tenants.len(),
            users = plan.users.len(),
            templates = plan.device_profile_templates.len(),
            gateways = plan.gateways.len(),
            applications = plan.applications.len(),
            device_profiles = plan.device_profiles.len(),
            "starting provisioning run"
        );

        for tenant in &mut plan.tenants {
            self.submit_tenant(tenant, doc).await?;
        }
        for user in &mut plan.users {
            self.submit_user(user, doc).await?;
        }
        for template in &plan.device_profile_templates {
            self.submit_template(template).await;
        }

        // Resolved tenant identifiers, by document ordinal.
        let tenant_ids: Vec<Option<String>> =
            plan.tenants.iter().map(|t| t.id.clone()).collect();

        for gateway in &mut plan.gateways {
            self.submit_gateway(gateway, &tenant_ids).await;
        }

        // Profile name → id per tenant ordinal, for device references.
        let mut profile_ids: HashMap<(usize, String), String> = HashMap::new();
        for profile in &mut plan.device_profiles {
            self.submit_device_profile(profile, &tenant_ids, doc, &mut profile_ids)
                .await?;
        }

        for application in &mut plan.applications {
            self.submit_application(application, &tenant_ids, doc, &profile_ids)
                .await?;
        }

        Ok(self.report)
    }

    fn log_unknown(&self, kind: EntityKind, label: &str, built: &BuiltRequest) {
        for key in &built.unknown {
            debug!(kind = %kind, name = label, field = %key, "ignoring unrecognized field");
        }
    }

    /// Record a failed create; an authentication failure halts the run.
    fn note_failure(&mut self, kind: EntityKind, label: &str, err: &ApiError) {
        if err.is_fatal() {
            error!(kind = %kind, name = label, error = %err, "authentication failed, halting run");
            self.halted = true;
            self.report.fatal = Some(err.to_string());
        } else {
            warn!(kind = %kind, name = label, error = %err, "creation failed, continuing with siblings");
        }
        self.report.failed(kind);
    }

    /// Settle a create of a natural-key entity. Returns true when the
    /// entity exists on the server afterwards (created now or already
    /// there from an earlier run).
    fn settle_natural(&mut self, kind: EntityKind, label: &str, result: ApiResult<()>) -> bool {
        match result {
            Ok(()) => {
                info!(kind = %kind, name = label, "created");
                self.report.created(kind);
                true
            }
            Err(ApiError::AlreadyExists(_)) => {
                info!(kind = %kind, name = label, "already exists, reusing");
                self.report.reused(kind);
                true
            }
            Err(err) => {
                self.note_failure(kind, label, &err);
                false
            }
        }
    }

    async fn submit_tenant(
        &mut self,
        record: &mut EntityRecord,
        doc: &mut SetupDocument,
    ) -> Result<()> {
        let kind = EntityKind::Tenant;
        let label = record.label().to_string();
        if self.halted {
            self.report.skipped(kind);
            return Ok(());
        }
        if let Some(id) = &record.id {
            info!(kind = %kind, name = %label, id = %id, "identifier present, reusing");
            self.report.reused(kind);
            return Ok(());
        }
        let built = registry::build_request(kind, &record.attrs);
        self.log_unknown(kind, &label, &built);
        match self.api.create_tenant(&built.body).await {
            Ok(id) => {
                doc.set_id(&record.path, &id)?;
                info!(kind = %kind, name = %label, id = %id, "created");
                record.id = Some(id);
                self.report.created(kind);
            }
            Err(err) => self.note_failure(kind, &label, &err),
        }
        Ok(())
    }

    async fn submit_user(
        &mut self,
        record: &mut EntityRecord,
        doc: &mut SetupDocument,
    ) -> Result<()> {
        let kind = EntityKind::User;
        let label = record.label().to_string();
        if self.halted {
            self.report.skipped(kind);
            return Ok(());
        }
        if let Some(id) = &record.id {
            info!(kind = %kind, name = %label, id = %id, "identifier present, reusing");
            self.report.reused(kind);
            return Ok(());
        }
        let built = registry::build_request(kind, &record.attrs);
        self.log_unknown(kind, &label, &built);
        let password = record.attrs.get("password").and_then(Value::as_str);
        match self.api.create_user(&built.body, password).await {
            Ok(id) => {
                doc.set_id(&record.path, &id)?;
                info!(kind = %kind, name = %label, id = %id, "created");
                record.id = Some(id);
                self.report.created(kind);
            }
            Err(err) => self.note_failure(kind, &label, &err),
        }
        Ok(())
    }

    async fn submit_template(&mut self, record: &EntityRecord) {
        let kind = EntityKind::DeviceProfileTemplate;
        let label = record.label().to_string();
        if self.halted {
            self.report.skipped(kind);
            return;
        }
        let built = registry::build_request(kind, &record.attrs);
        self.log_unknown(kind, &label, &built);
        let result = self.api.create_device_profile_template(&built.body).await;
        self.settle_natural(kind, &label, result);
    }

    async fn submit_gateway(&mut self, record: &mut EntityRecord, tenant_ids: &[Option<String>]) {
        let kind = EntityKind::Gateway;
        let label = record.label().to_string();
        if self.halted {
            self.report.skipped(kind);
            return;
        }
        let Some(tenant_id) = resolved_parent(record, tenant_ids) else {
            warn!(kind = %kind, name = %label, "parent tenant unresolved, skipping");
            self.report.skipped(kind);
            return;
        };
        record.tenant_id = Some(tenant_id.clone());
        let built = registry::build_request(kind, &record.attrs);
        self.log_unknown(kind, &label, &built);
        let result = self.api.create_gateway(&tenant_id, &built.body).await;
        self.settle_natural(kind, &label, result);
    }

    async fn submit_device_profile(
        &mut self,
        record: &mut EntityRecord,
        tenant_ids: &[Option<String>],
        doc: &mut SetupDocument,
        profile_ids: &mut HashMap<(usize, String), String>,
    ) -> Result<()> {
        let kind = EntityKind::DeviceProfile;
        let label = record.label().to_string();
        let ordinal = record.path.top_level_ordinal().unwrap_or_default();
        if self.halted {
            self.report.skipped(kind);
            return Ok(());
        }
        if let Some(id) = record.id.clone() {
            info!(kind = %kind, name = %label, id = %id, "identifier present, reusing");
            profile_ids.insert((ordinal, label.clone()), id);
            self.report.reused(kind);
            return Ok(());
        }
        let Some(tenant_id) = resolved_parent(record, tenant_ids) else {
            warn!(kind = %kind, name = %label, "parent tenant unresolved, skipping");
            self.report.skipped(kind);
            return Ok(());
        };
        record.tenant_id = Some(tenant_id.clone());

        let mut built = registry::build_request(kind, &record.attrs);
        self.log_unknown(kind, &label, &built);
        if let Some(script_path) = record
            .attrs
            .get("payload_codec_script_path")
            .and_then(Value::as_str)
        {
            match fs::read_to_string(script_path) {
                Ok(script) => {
                    built
                        .body
                        .insert("payloadCodecScript".to_string(), Value::String(script));
                }
                Err(err) => {
                    warn!(kind = %kind, name = %label, path = %script_path, error = %err,
                        "codec script unreadable, profile not provisioned");
                    self.report.failed(kind);
                    return Ok(());
                }
            }
        }

        match self.api.create_device_profile(&tenant_id, &built.body).await {
            Ok(id) => {
                doc.set_id(&record.path, &id)?;
                info!(kind = %kind, name = %label, id = %id, "created");
                profile_ids.insert((ordinal, label.clone()), id.clone());
                record.id = Some(id);
                self.report.created(kind);
            }
            Err(err) => self.note_failure(kind, &label, &err),
        }
        Ok(())
    }

    async fn submit_application(
        &mut self,
        record: &mut EntityRecord,
        tenant_ids: &[Option<String>],
        doc: &mut SetupDocument,
        profile_ids: &HashMap<(usize, String), String>,
    ) -> Result<()> {
        let kind = EntityKind::Application;
        let label = record.label().to_string();
        let ordinal = record.path.top_level_ordinal().unwrap_or_default();
        if self.halted {
            self.report.skipped(kind);
            self.skip_nested(record);
            return Ok(());
        }

        let app_id = if let Some(id) = record.id.clone() {
            info!(kind = %kind, name = %label, id = %id, "identifier present, reusing");
            self.report.reused(kind);
            Some(id)
        } else if let Some(tenant_id) = resolved_parent(record, tenant_ids) {
            record.tenant_id = Some(tenant_id.clone());
            let built = registry::build_request(kind, &record.attrs);
            self.log_unknown(kind, &label, &built);
            match self.api.create_application(&tenant_id, &built.body).await {
                Ok(id) => {
                    doc.set_id(&record.path, &id)?;
                    info!(kind = %kind, name = %label, id = %id, "created");
                    record.id = Some(id.clone());
                    self.report.created(kind);
                    Some(id)
                }
                Err(err) => {
                    self.note_failure(kind, &label, &err);
                    None
                }
            }
        } else {
            warn!(kind = %kind, name = %label, "parent tenant unresolved, skipping");
            self.report.skipped(kind);
            None
        };

        match app_id {
            Some(id) => {
                self.submit_integrations(record, &id).await;
                self.submit_devices(record, &id, ordinal, profile_ids).await;
            }
            // Children of an unprovisioned application are never
            // submitted; account for them so totals add up.
            None => self.skip_nested(record),
        }
        Ok(())
    }

    async fn submit_integrations(&mut self, app: &EntityRecord, application_id: &str) {
        let kind = EntityKind::Integration;
        let Some(integrations) = app.attrs.get("integrations").and_then(Value::as_object) else {
            return;
        };
        for (name, config) in integrations {
            if self.halted {
                self.report.skipped(kind);
                continue;
            }
            let Some(config) = config.as_object() else {
                warn!(kind = %kind, integration = %name, "integration config is not an object");
                self.report.failed(kind);
                continue;
            };
            let config = resolve_env_refs(config);
            let result = self
                .api
                .create_integration(application_id, name, &config)
                .await;
            self.settle_natural(kind, name, result);
        }
    }

    async fn submit_devices(
        &mut self,
        app: &EntityRecord,
        application_id: &str,
        tenant_ordinal: usize,
        profile_ids: &HashMap<(usize, String), String>,
    ) {
        let kind = EntityKind::Device;
        let Some(devices) = app.attrs.get("devices").and_then(Value::as_array) else {
            return;
        };
        for device in devices {
            if self.halted {
                self.report.skipped(kind);
                if device.get("deviceKeys").is_some() {
                    self.report.skipped(EntityKind::DeviceKeys);
                }
                continue;
            }
            let Some(attrs) = device.as_object() else {
                warn!(kind = %kind, application = %app.label(), "device record is not an object");
                self.report.failed(kind);
                continue;
            };
            let label = attrs
                .get("name")
                .or_else(|| attrs.get("dev_eui"))
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>")
                .to_string();

            let Some(dev_eui) = attrs.get("dev_eui").and_then(Value::as_str) else {
                warn!(kind = %kind, name = %label, "device has no dev_eui, skipping");
                self.report.failed(kind);
                continue;
            };

            // A device needs its profile resolved before submission.
            let profile_id = attrs
                .get("deviceProfileId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    attrs
                        .get("device_profile")
                        .and_then(Value::as_str)
                        .and_then(|name| {
                            profile_ids.get(&(tenant_ordinal, name.to_string())).cloned()
                        })
                });
            let Some(profile_id) = profile_id else {
                warn!(kind = %kind, name = %label,
                    "device profile reference unresolved, device not provisioned");
                self.report.failed(kind);
                if attrs.get("deviceKeys").is_some() {
                    self.report.skipped(EntityKind::DeviceKeys);
                }
                continue;
            };

            let built = registry::build_request(kind, attrs);
            self.log_unknown(kind, &label, &built);
            let result = self
                .api
                .create_device(application_id, &profile_id, &built.body)
                .await;
            let exists = self.settle_natural(kind, &label, result);

            if let Some(keys) = attrs.get("deviceKeys").and_then(Value::as_object) {
                if exists && !self.halted {
                    let built = registry::build_request(EntityKind::DeviceKeys, keys);
                    self.log_unknown(EntityKind::DeviceKeys, dev_eui, &built);
                    let result = self.api.create_device_keys(dev_eui, &built.body).await;
                    self.settle_natural(EntityKind::DeviceKeys, dev_eui, result);
                } else {
                    self.report.skipped(EntityKind::DeviceKeys);
                }
            }
        }
    }

    /// Count an application's nested entities as skipped.
    fn skip_nested(&mut self, app: &EntityRecord) {
        if let Some(integrations) = app.attrs.get("integrations").and_then(Value::as_object) {
            for _ in integrations {
                self.report.skipped(EntityKind::Integration);
            }
        }
        if let Some(devices) = app.attrs.get("devices").and_then(Value::as_array) {
            for device in devices {
                self.report.skipped(EntityKind::Device);
                if device.get("deviceKeys").is_some() {
                    self.report.skipped(EntityKind::DeviceKeys);
                }
            }
        }
    }
}

/// Identifier of the tenant a child record was nested under, if that
/// tenant resolved.
fn resolved_parent(record: &EntityRecord, tenant_ids: &[Option<String>]) -> Option<String> {
    record
        .path
        .top_level_ordinal()
        .and_then(|i| tenant_ids.get(i).cloned())
        .flatten()
}

/// Resolve `*_env_var` indirections in an integration config: the value
/// names an environment variable whose content becomes the config key
/// without the suffix.
fn resolve_env_refs(config: &JsonMap) -> JsonMap {
    let mut out = JsonMap::new();
    for (key, value) in config {
        match key.strip_suffix("_env_var") {
            Some(target) => {
                let Some(var_name) = value.as_str() else {
                    warn!(field = %key, "environment reference is not a string, dropping");
                    continue;
                };
                match std::env::var(var_name) {
                    Ok(resolved) => {
                        out.insert(target.to_string(), Value::String(resolved));
                    }
                    Err(_) => {
                        warn!(field = %key, variable = %var_name,
                            "environment variable not set, dropping integration field");
                    }
                }
            }
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::api::MockApi;
    use crate::api::mock::InjectedFailure;
    use crate::document::SetupDocument;

    use super::*;

    fn doc(value: Value) -> SetupDocument {
        SetupDocument::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn preexisting_tenant_id_is_reused_without_a_create_call() {
        let api = MockApi::new();
        let mut document = doc(json!({
            "tenants": [{"id": "t-restored", "name": "T"}]
        }));
        let report = ProvisioningEngine::new(&api)
            .run(&mut document)
            .await
            .unwrap();
        assert!(api.calls_for("tenant").is_empty());
        assert_eq!(report.counts(EntityKind::Tenant).reused, 1);
        assert_eq!(document.root()["tenants"][0]["id"], "t-restored");
    }

    #[tokio::test]
    async fn gateway_conflict_on_rerun_counts_as_reused() {
        let api = MockApi::new();
        api.fail("gateway", "0102030405060708", InjectedFailure::AlreadyExists);
        let mut document = doc(json!({
            "tenants": [{"name": "T", "gateways": [
                {"gatewayId": "0102030405060708", "name": "gw"}
            ]}]
        }));
        let report = ProvisioningEngine::new(&api)
            .run(&mut document)
            .await
            .unwrap();
        assert_eq!(report.counts(EntityKind::Gateway).reused, 1);
        assert_eq!(report.counts(EntityKind::Gateway).failed, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn children_of_a_failed_tenant_are_skipped_not_submitted() {
        let api = MockApi::new();
        api.fail("tenant", "T", InjectedFailure::Unavailable);
        let mut document = doc(json!({
            "tenants": [{"name": "T",
                "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}],
                "applications": [{"name": "app"}]
            }]
        }));
        let report = ProvisioningEngine::new(&api)
            .run(&mut document)
            .await
            .unwrap();
        assert_eq!(report.counts(EntityKind::Tenant).failed, 1);
        assert_eq!(report.counts(EntityKind::Gateway).skipped, 1);
        assert_eq!(report.counts(EntityKind::Application).skipped, 1);
        assert!(api.calls_for("gateway").is_empty());
        assert!(api.calls_for("application").is_empty());
    }

    #[test]
    fn env_refs_resolve_against_the_environment() {
        std::env::set_var("ENGINE_TEST_IDB_TOKEN", "sekrit");
        let config = json!({
            "version": "INFLUXDB_2",
            "token_env_var": "ENGINE_TEST_IDB_TOKEN",
            "bucket_env_var": "ENGINE_TEST_UNSET_VARIABLE"
        });
        let resolved = resolve_env_refs(config.as_object().unwrap());
        assert_eq!(resolved["version"], "INFLUXDB_2");
        assert_eq!(resolved["token"], "sekrit");
        assert!(resolved.get("bucket").is_none());
        std::env::remove_var("ENGINE_TEST_IDB_TOKEN");
    }

    #[test]
    fn report_display_lists_touched_kinds_only() {
        let mut report = RunReport::default();
        report.created(EntityKind::Tenant);
        report.failed(EntityKind::Device);
        let rendered = report.to_string();
        assert!(rendered.contains("tenant"));
        assert!(rendered.contains("device"));
        assert!(!rendered.contains("gateway"));
    }
}
