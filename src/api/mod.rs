//! The management-API boundary.
//!
//! [`ProvisioningApi`] is the sole seam between the engine and the
//! server: one create operation per entity kind, plus the get/list
//! operations the backup path reads with. The engine never sees a
//! transport; implementations live in [`http`] (the real server) and
//! [`mock`] (in-memory, for tests and `--dry-run`).

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ApiResult;

pub use http::HttpApi;
pub use mock::MockApi;

/// JSON object, as used for request bodies and returned entities.
pub type JsonMap = Map<String, Value>;

#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Create a tenant, returning its server-assigned identifier.
    async fn create_tenant(&self, tenant: &JsonMap) -> ApiResult<String>;

    /// Create a global user, returning its server-assigned identifier.
    async fn create_user(&self, user: &JsonMap, password: Option<&str>) -> ApiResult<String>;

    /// Create a device profile template. The identifier is caller
    /// assigned, so the response carries none.
    async fn create_device_profile_template(&self, template: &JsonMap) -> ApiResult<()>;

    /// Create a gateway under a tenant. Gateways are identified by
    /// their hardware EUI; the response carries no identifier.
    async fn create_gateway(&self, tenant_id: &str, gateway: &JsonMap) -> ApiResult<()>;

    /// Create an application under a tenant, returning its identifier.
    async fn create_application(&self, tenant_id: &str, application: &JsonMap)
        -> ApiResult<String>;

    /// Create a device profile under a tenant, returning its identifier.
    async fn create_device_profile(&self, tenant_id: &str, profile: &JsonMap)
        -> ApiResult<String>;

    /// Configure an integration of the given kind on an application.
    async fn create_integration(
        &self,
        application_id: &str,
        kind: &str,
        config: &JsonMap,
    ) -> ApiResult<()>;

    /// Create a device. Devices are identified by their DevEUI; the
    /// response carries no identifier.
    async fn create_device(
        &self,
        application_id: &str,
        device_profile_id: &str,
        device: &JsonMap,
    ) -> ApiResult<()>;

    /// Attach join credentials to a device.
    async fn create_device_keys(&self, dev_eui: &str, keys: &JsonMap) -> ApiResult<()>;

    /// Fetch one tenant's full record.
    async fn get_tenant(&self, id: &str) -> ApiResult<JsonMap>;

    /// List all tenants (summary records, each carrying an `id`).
    async fn list_tenants(&self) -> ApiResult<Vec<JsonMap>>;

    async fn list_gateways(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>>;

    async fn list_applications(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>>;

    async fn list_device_profiles(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>>;

    async fn list_devices(&self, application_id: &str) -> ApiResult<Vec<JsonMap>>;
}
