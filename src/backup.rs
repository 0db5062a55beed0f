//! Reassemble a setup document from a live server.
//!
//! The read-side counterpart of provisioning: tenants and their
//! children are fetched through the gateway's get/list operations and
//! regrouped into the nested document shape, so the output can be fed
//! straight back into a restore run. Read failures follow the same
//! policy as provisioning — per-entity problems are logged and skipped,
//! authentication failures abort.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{JsonMap, ProvisioningApi};
use crate::document::SetupDocument;
use crate::error::{ApiError, Result};

/// Dump the server's tenants, gateways, applications, device profiles
/// and devices into a setup document.
pub async fn backup(api: &dyn ProvisioningApi) -> Result<SetupDocument> {
    let mut tenants = Vec::new();

    for summary in api.list_tenants().await? {
        let Some(id) = summary.get("id").and_then(Value::as_str).map(str::to_string) else {
            warn!("tenant summary without id, skipping");
            continue;
        };

        let mut tenant = match api.get_tenant(&id).await {
            Ok(full) => full,
            Err(err) if !err.is_fatal() => {
                warn!(tenant = %id, error = %err, "tenant fetch failed, using summary");
                summary
            }
            Err(err) => return Err(err.into()),
        };

        let gateways = child_list(api.list_gateways(&id).await, &id, "gateways")?;
        let device_profiles =
            child_list(api.list_device_profiles(&id).await, &id, "device_profiles")?;

        let mut applications = Vec::new();
        for mut app in child_list(api.list_applications(&id).await, &id, "applications")? {
            if let Some(app_id) = app.get("id").and_then(Value::as_str).map(str::to_string) {
                let devices = child_list(api.list_devices(&app_id).await, &app_id, "devices")?;
                if !devices.is_empty() {
                    app.insert("devices".to_string(), Value::Array(wrap(devices)));
                }
            }
            applications.push(app);
        }

        tenant.insert("gateways".to_string(), Value::Array(wrap(gateways)));
        tenant.insert("applications".to_string(), Value::Array(wrap(applications)));
        tenant.insert(
            "device_profiles".to_string(),
            Value::Array(wrap(device_profiles)),
        );
        tenants.push(Value::Object(tenant));
    }

    info!(tenants = tenants.len(), "backup assembled");
    SetupDocument::from_value(json!({ "tenants": tenants })).map_err(Into::into)
}

/// Unwrap a child listing, tolerating per-entity failures.
fn child_list(
    result: std::result::Result<Vec<JsonMap>, ApiError>,
    parent: &str,
    what: &str,
) -> Result<Vec<JsonMap>> {
    match result {
        Ok(items) => Ok(items),
        Err(err) if !err.is_fatal() => {
            warn!(parent = %parent, kind = %what, error = %err, "listing failed, leaving empty");
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

fn wrap(items: Vec<JsonMap>) -> Vec<Value> {
    items.into_iter().map(Value::Object).collect()
}
