//! HTTP implementation of [`ProvisioningApi`].
//!
//! Talks to the server's REST surface with a bearer token. Request
//! bodies wrap the entity under its kind key, mirroring the server's
//! create-request shape; error statuses map onto [`ApiError`] so the
//! engine can tell a fatal authentication failure from a per-entity
//! problem.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::settings::Settings;

use super::{JsonMap, ProvisioningApi};

/// Page size for list calls.
const LIST_PAGE: usize = 1000;

#[derive(Debug)]
pub struct HttpApi {
    base: Url,
    token: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(server: &str, api_token: &str) -> ApiResult<Self> {
        // A base without a trailing slash would swallow its last path
        // segment on join().
        let normalized = if server.ends_with('/') {
            server.to_string()
        } else {
            format!("{server}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{server}: {e}")))?;
        Ok(Self {
            base,
            token: api_token.to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn from_settings(settings: &Settings) -> ApiResult<Self> {
        Self::new(&settings.server, &settings.api_token)
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{path}: {e}")))
    }

    async fn post(&self, path: &str, body: Value) -> ApiResult<Value> {
        let resp = self
            .client
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Value> {
        let resp = self
            .client
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn decode(resp: reqwest::Response) -> ApiResult<Value> {
        let status = resp.status();
        if status.is_success() {
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("malformed response body: {e}")));
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(raw);

        Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthenticated(message),
            StatusCode::FORBIDDEN => ApiError::PermissionDenied(message),
            StatusCode::CONFLICT => ApiError::AlreadyExists(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                ApiError::Unavailable(message)
            }
            other => ApiError::Remote {
                status: other.as_u16(),
                message,
            },
        })
    }

    /// Walk a paginated list endpoint until the server runs dry.
    async fn list(&self, path: &str, query: Vec<(&str, String)>) -> ApiResult<Vec<JsonMap>> {
        let mut items = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut page_query = query.clone();
            page_query.push(("limit", LIST_PAGE.to_string()));
            page_query.push(("offset", offset.to_string()));
            let body = self.get(path, &page_query).await?;
            let batch = body
                .get("result")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ApiError::InvalidResponse(format!("list response for {path} has no result array"))
                })?;
            let len = batch.len();
            items.extend(
                batch
                    .iter()
                    .filter_map(Value::as_object)
                    .cloned(),
            );
            if len < LIST_PAGE {
                break;
            }
            offset += len;
        }
        Ok(items)
    }

    fn require_id(body: &Value) -> ApiResult<String> {
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("create response carries no id".to_string()))
    }

    fn with_parent(body: &JsonMap, key: &str, value: &str) -> JsonMap {
        let mut merged = body.clone();
        merged.insert(key.to_string(), Value::String(value.to_string()));
        merged
    }
}

#[async_trait]
impl ProvisioningApi for HttpApi {
    async fn create_tenant(&self, tenant: &JsonMap) -> ApiResult<String> {
        let body = self.post("api/tenants", json!({ "tenant": tenant })).await?;
        Self::require_id(&body)
    }

    async fn create_user(&self, user: &JsonMap, password: Option<&str>) -> ApiResult<String> {
        let body = self
            .post(
                "api/users",
                json!({ "user": user, "password": password.unwrap_or(""), "tenants": [] }),
            )
            .await?;
        Self::require_id(&body)
    }

    async fn create_device_profile_template(&self, template: &JsonMap) -> ApiResult<()> {
        self.post(
            "api/device-profile-templates",
            json!({ "deviceProfileTemplate": template }),
        )
        .await?;
        Ok(())
    }

    async fn create_gateway(&self, tenant_id: &str, gateway: &JsonMap) -> ApiResult<()> {
        let gateway = Self::with_parent(gateway, "tenantId", tenant_id);
        self.post("api/gateways", json!({ "gateway": gateway })).await?;
        Ok(())
    }

    async fn create_application(
        &self,
        tenant_id: &str,
        application: &JsonMap,
    ) -> ApiResult<String> {
        let application = Self::with_parent(application, "tenantId", tenant_id);
        let body = self
            .post("api/applications", json!({ "application": application }))
            .await?;
        Self::require_id(&body)
    }

    async fn create_device_profile(&self, tenant_id: &str, profile: &JsonMap) -> ApiResult<String> {
        let profile = Self::with_parent(profile, "tenantId", tenant_id);
        let body = self
            .post("api/device-profiles", json!({ "deviceProfile": profile }))
            .await?;
        Self::require_id(&body)
    }

    async fn create_integration(
        &self,
        application_id: &str,
        kind: &str,
        config: &JsonMap,
    ) -> ApiResult<()> {
        let integration = Self::with_parent(config, "applicationId", application_id);
        self.post(
            &format!("api/applications/{application_id}/integrations/{kind}"),
            json!({ "integration": integration }),
        )
        .await?;
        Ok(())
    }

    async fn create_device(
        &self,
        application_id: &str,
        device_profile_id: &str,
        device: &JsonMap,
    ) -> ApiResult<()> {
        let mut device = Self::with_parent(device, "applicationId", application_id);
        device.insert(
            "deviceProfileId".to_string(),
            Value::String(device_profile_id.to_string()),
        );
        self.post("api/devices", json!({ "device": device })).await?;
        Ok(())
    }

    async fn create_device_keys(&self, dev_eui: &str, keys: &JsonMap) -> ApiResult<()> {
        let keys = Self::with_parent(keys, "devEui", dev_eui);
        self.post(
            &format!("api/devices/{dev_eui}/keys"),
            json!({ "deviceKeys": keys }),
        )
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> ApiResult<JsonMap> {
        let body = self.get(&format!("api/tenants/{id}"), &[]).await?;
        body.get("tenant")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse("tenant response has no tenant object".to_string()))
    }

    async fn list_tenants(&self) -> ApiResult<Vec<JsonMap>> {
        self.list("api/tenants", Vec::new()).await
    }

    async fn list_gateways(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        self.list("api/gateways", vec![("tenantId", tenant_id.to_string())])
            .await
    }

    async fn list_applications(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        self.list("api/applications", vec![("tenantId", tenant_id.to_string())])
            .await
    }

    async fn list_device_profiles(&self, tenant_id: &str) -> ApiResult<Vec<JsonMap>> {
        self.list(
            "api/device-profiles",
            vec![("tenantId", tenant_id.to_string())],
        )
        .await
    }

    async fn list_devices(&self, application_id: &str) -> ApiResult<Vec<JsonMap>> {
        self.list(
            "api/devices",
            vec![("applicationId", application_id.to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let api = HttpApi::new("http://localhost:8090/chirpstack", "token").unwrap();
        assert_eq!(
            api.endpoint("api/tenants").unwrap().as_str(),
            "http://localhost:8090/chirpstack/api/tenants"
        );
    }

    #[test]
    fn invalid_server_address_is_rejected() {
        let err = HttpApi::new("not a url", "token").unwrap_err();
        assert!(matches!(err, ApiError::InvalidEndpoint(_)));
    }
}
