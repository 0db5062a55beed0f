//! In-memory implementation of [`ProvisioningApi`].
//!
//! Backs `--dry-run` and the test suite: create calls are recorded and
//! answered with generated identifiers, injected failures simulate the
//! server's error answers, and created entities are visible to the read
//! side so a backup round-trips against it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

use super::{JsonMap, ProvisioningApi};

/// Failure injected for one (kind, label) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Unauthenticated,
    PermissionDenied,
    AlreadyExists,
    Unavailable,
}

impl InjectedFailure {
    fn into_error(self, label: &str) -> ApiError {
        match self {
            InjectedFailure::Unauthenticated => {
                ApiError::Unauthenticated(format!("injected for {label}"))
            }
            InjectedFailure::PermissionDenied => {
                ApiError::PermissionDenied(format!("injected for {label}"))
            }
            InjectedFailure::AlreadyExists => {
                ApiError::AlreadyExists(format!("injected for {label}"))
            }
            InjectedFailure::Unavailable => ApiError::Unavailable(format!("injected for {label}")),
        }
    }
}

/// One recorded create call.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub kind: &'static str,
    /// Name or natural key of the submitted entity.
    pub label: String,
    /// Request body as submitted, parent references included.
    pub body: JsonMap,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    calls: Vec<CreateCall>,
    failures: HashMap<(String, String), InjectedFailure>,
    tenants: Vec<JsonMap>,
    gateways: HashMap<String, Vec<JsonMap>>,
    applications: HashMap<String, Vec<JsonMap>>,
    device_profiles: HashMap<String, Vec<JsonMap>>,
    devices: HashMap<String, Vec<JsonMap>>,
}

#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next create of `(kind, label)` answer with `failure`.
    pub fn fail(&self, kind: &str, label: &str, failure: InjectedFailure) {
        self.lock()
            .failures
            .insert((kind.to_string(), label.to_string()), failure);
    }

    /// All create calls seen so far, in submission order.
    pub fn calls(&self) -> Vec<CreateCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, kind: &str) -> Vec<CreateCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Check injected failures, then record the call.
    fn admit(&self, kind: &'static str, label: &str, body: JsonMap) -> ApiResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        if let Some(failure) = state
            .failures
            .get(&(kind.to_string(), label.to_string()))
            .copied()
        {
            return Err(failure.into_error(label));
        }
        state.calls.push(CreateCall {
            kind,
            label: label.to_string(),
            body,
        });
        Ok(state)
    }

    fn next_id(state: &mut MockState, kind: &str) -> String {
        state.next_id += 1;
        format!("{kind}-{}", state.next_id)
    }
}

fn label_of(body: &JsonMap, keys: &[&str]) -> String {
    for key in keys {
        if let Some(v) = body.get(*key).and_then(Value::as_str) {
            return v.to_string();
        }
    }
    "<unnamed>".to_string()
}

#[async_trait]
impl ProvisioningApi for MockApi {
    async fn create_tenant(&self, tenant: &JsonMap) -> ApiResult<String> {
        let label = label_of(tenant, &["name"]);
        let mut state = self.admit("tenant", &label, tenant.clone())?;
        let id = Self::next_id(&mut state, "tenant");
        let mut stored = tenant.clone();
        stored.insert("id".to_string(), Value::String(id.clone()));
        state.tenants.push(stored);
        Ok(id)
    }

    async fn create_user(&self, user: &JsonMap, _password: Option<&str>) -> ApiResult<String> {
        let label = label_of(user, &["email"]);
        let mut state = self.admit("user", &label, user.clone())?;
        let id = Self::next_id(&mut state, "user");
        Ok(id)
    }

    async fn create_device_profile_template(&self, template: &JsonMap) -> ApiResult<()> {
        let label = label_of(template, &["id", "name"]);
        self.admit("device_profile_template", &label, template.clone())?;
        Ok(())
    }

    async fn create_gateway(&self, tenant_id: &str, gateway: &JsonMap) -> ApiResult<()> {
        let label = label_of(gateway, &["gatewayId"]);
        let mut body = gateway.clone();
        body.insert("tenantId".to_string(), Value::String(tenant_id.to_string()));
        let mut state = self.admit("gateway", &label, body.clone())?;
        state
            .gateways
            .entry(tenant_id.to_string())
            .or_default()
            .push(body);
        Ok(())
    }

    async fn create_application(
        &self,
        tenant_id: &str,
        application: &JsonMap,
    ) -> ApiResult<String> {
        let label = label_of(application, &["name"]);
        let mut body = application.clone();
        body.insert("tenantId".to_string(), Value::String(tenant_id.to_string()));
        let mut state = self.admit("application", &label, body.clone())?;
        let id = Self::next_id(&mut state, "application");
        body.insert("id".to_string(), Value::String(id.clone()));
        state
            .applications
            .entry(tenant_id.to_string())
            .or_default()
            .push(body);
        Ok(id)
    }

    async fn create_device_profile(&self, tenant_id: &str, profile: &JsonMap) -> ApiResult<String> {
        let label = label_of(profile, &["name"]);
        let mut body = profile.clone();
        body.insert("tenantId".to_string(), Value::String(tenant_id.to_string()));
        let mut state = self.admit("device_profile", &label, body.clone())?;
        let id = Self::next_id(&mut state, "device_profile");
        body.insert("id".to_string(), Value::String(id.clone()));
        state
            .device_profiles
            .entry(tenant_id.to_string())
            .or_default()
            .push(body);
        Ok(id)
    }

    async fn create_integration(
        &self,
        application_id: &str,
        kind: &str,
        config: &JsonMap,
    ) -> ApiResult<()> {
        let mut body = config.clone();
        body.insert(
            "applicationId".to_string(),
            Value::String(application_id.to_string()),
        );
        body.insert("kind".to_string(), Value::String(kind.to_string()));
        self.admit("integration", kind, body)?;
        Ok(())
    }

    async fn create_device(
        &self,
        application_id: &str,
        device_profile_id: &str,
        device: &JsonMap,
    ) -> ApiResult<()> {
        let label = label_of(device, &["devEui", "name"]);
        let mut body = device.clone();
        body.insert(
            "applicationId".to_string(),
            Value::String(application_id.to_string()),
        );
        body.insert(
            "deviceProfileId".to_string(),
            Value::String(device_profile_id.to_string()),
        );
        let mut state = self.admit("device", &label, body.clone())?;
        state
            .devices
            .entry(application_id.to_string())
            .or_default()
            .push(body);
        Ok(())
    }

    async fn create_device_keys(&self, dev_eui: &str, keys: &JsonMap) -> ApiResult<()> {
        let mut body = keys.clone();
        body.insert("devEui".to_string(), Value::String(dev_eui.to_string()));
        self.admit("device_keys", dev_eui, body)?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> ApiResult<JsonMap> {
        self.lock()
            .tenants
            .iter()
            .find(|t| t.get("id").and_then(Value::as_str) == Some(id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("tenant {id}")))
    }

    async fn list_tenants(&self) -> ApiResult<Vec<JsonMap>> {
        Ok(self.lock().tenants.clone())
    }

    async fn list_gateways(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        Ok(self.lock().gateways.get(tenant_id).cloned().unwrap_or_default())
    }

    async fn list_applications(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        Ok(self
            .lock()
            .applications
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_device_profiles(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        Ok(self
            .lock()
            .device_profiles
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_devices(&self, application_id: &str) -> ApiResult<Vec<JsonMap>> {
        Ok(self
            .lock()
            .devices
            .get(application_id)
            .cloned()
            .unwrap_or_default())
    }
}
