//! Per-kind request field registries.
//!
//! Requests to the management API are built from an entity's attribute
//! bag through an explicit allow-list that maps document field names to
//! API field names. Keys outside the allow-list are kept aside and
//! reported to the caller for logging — never silently dropped into the
//! request, never an error — so a document written against a newer or
//! older schema still provisions its known fields.

use serde_json::{Map, Value};

use crate::decompose::EntityKind;

/// One allow-listed field: document name → API name.
struct FieldSpec {
    doc: &'static str,
    api: &'static str,
}

const fn field(doc: &'static str, api: &'static str) -> FieldSpec {
    FieldSpec { doc, api }
}

const TENANT_FIELDS: &[FieldSpec] = &[
    field("name", "name"),
    field("description", "description"),
    field("canHaveGateways", "canHaveGateways"),
    field("maxGatewayCount", "maxGatewayCount"),
    field("maxDeviceCount", "maxDeviceCount"),
    field("privateGatewaysUp", "privateGatewaysUp"),
    field("privateGatewaysDown", "privateGatewaysDown"),
    field("tags", "tags"),
];

const USER_FIELDS: &[FieldSpec] = &[
    field("email", "email"),
    field("isAdmin", "isAdmin"),
    field("isActive", "isActive"),
    field("note", "note"),
];

const TEMPLATE_FIELDS: &[FieldSpec] = &[
    field("id", "id"),
    field("name", "name"),
    field("description", "description"),
    field("vendor", "vendor"),
    field("firmware", "firmware"),
    field("region", "region"),
    field("macVersion", "macVersion"),
    field("regParamsRevision", "regParamsRevision"),
    field("supportsOtaa", "supportsOtaa"),
    field("supportsClassB", "supportsClassB"),
    field("supportsClassC", "supportsClassC"),
    field("payloadCodecRuntime", "payloadCodecRuntime"),
    field("payloadCodecScript", "payloadCodecScript"),
    field("tags", "tags"),
];

const GATEWAY_FIELDS: &[FieldSpec] = &[
    field("gatewayId", "gatewayId"),
    field("name", "name"),
    field("description", "description"),
    field("statsInterval", "statsInterval"),
    field("tags", "tags"),
];

const APPLICATION_FIELDS: &[FieldSpec] = &[
    field("name", "name"),
    field("description", "description"),
    field("tags", "tags"),
];

const DEVICE_PROFILE_FIELDS: &[FieldSpec] = &[
    field("name", "name"),
    field("description", "description"),
    field("region", "region"),
    field("macVersion", "macVersion"),
    field("regParamsRevision", "regParamsRevision"),
    field("supportsOtaa", "supportsOtaa"),
    field("supportsClassB", "supportsClassB"),
    field("supportsClassC", "supportsClassC"),
    field("uplinkInterval", "uplinkInterval"),
    field("adrAlgorithmId", "adrAlgorithmId"),
    field("payloadCodecRuntime", "payloadCodecRuntime"),
    field("payloadCodecScript", "payloadCodecScript"),
    field("flushQueueOnActivate", "flushQueueOnActivate"),
    field("deviceStatusReqInterval", "deviceStatusReqInterval"),
    field("tags", "tags"),
];

const DEVICE_FIELDS: &[FieldSpec] = &[
    field("dev_eui", "devEui"),
    field("joinEui", "joinEui"),
    field("name", "name"),
    field("description", "description"),
    field("skipFcntCheck", "skipFcntCheck"),
    field("isDisabled", "isDisabled"),
    field("variables", "variables"),
    field("tags", "tags"),
];

const DEVICE_KEYS_FIELDS: &[FieldSpec] = &[field("nwkKey", "nwkKey"), field("appKey", "appKey")];

/// Keys with structural meaning to the pipeline itself. They are
/// consumed elsewhere (identifiers, nesting, references, local file
/// indirection) and must not be reported as unrecognized.
fn reserved_keys(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Tenant => &["id", "gateways", "applications", "device_profiles"],
        EntityKind::User => &["id", "password"],
        EntityKind::DeviceProfileTemplate => &[],
        EntityKind::Gateway => &["tenant_id"],
        EntityKind::Application => &[
            "id",
            "tenant_id",
            "devices",
            "integrations",
            "multicast_groups",
        ],
        EntityKind::DeviceProfile => &["id", "tenant_id", "payload_codec_script_path"],
        EntityKind::Integration => &[],
        EntityKind::Device => &["deviceKeys", "device_profile", "deviceProfileId"],
        EntityKind::DeviceKeys => &["dev_eui"],
    }
}

fn fields(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::Tenant => TENANT_FIELDS,
        EntityKind::User => USER_FIELDS,
        EntityKind::DeviceProfileTemplate => TEMPLATE_FIELDS,
        EntityKind::Gateway => GATEWAY_FIELDS,
        EntityKind::Application => APPLICATION_FIELDS,
        EntityKind::DeviceProfile => DEVICE_PROFILE_FIELDS,
        EntityKind::Integration => &[],
        EntityKind::Device => DEVICE_FIELDS,
        EntityKind::DeviceKeys => DEVICE_KEYS_FIELDS,
    }
}

/// A request body built from an attribute bag, plus the keys the
/// allow-list did not recognize.
#[derive(Debug, Clone, Default)]
pub struct BuiltRequest {
    pub body: Map<String, Value>,
    pub unknown: Vec<String>,
}

/// Build the request body for one entity from its attribute bag.
pub fn build_request(kind: EntityKind, attrs: &Map<String, Value>) -> BuiltRequest {
    let registry = fields(kind);
    let reserved = reserved_keys(kind);
    let mut built = BuiltRequest::default();

    for (key, value) in attrs {
        if let Some(spec) = registry.iter().find(|f| f.doc == key) {
            built.body.insert(spec.api.to_string(), value.clone());
        } else if !reserved.contains(&key.as_str()) {
            built.unknown.push(key.clone());
        }
    }
    built
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bag(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn device_fields_map_to_api_names() {
        let built = build_request(
            EntityKind::Device,
            &bag(json!({
                "dev_eui": "0102030405060708",
                "name": "sensor",
                "skipFcntCheck": true
            })),
        );
        assert_eq!(built.body["devEui"], "0102030405060708");
        assert_eq!(built.body["name"], "sensor");
        assert_eq!(built.body["skipFcntCheck"], true);
        assert!(built.body.get("dev_eui").is_none());
        assert!(built.unknown.is_empty());
    }

    #[test]
    fn unknown_keys_are_reported_not_sent() {
        let built = build_request(
            EntityKind::Tenant,
            &bag(json!({"name": "T", "futureKnob": 42})),
        );
        assert!(built.body.get("futureKnob").is_none());
        assert_eq!(built.unknown, vec!["futureKnob"]);
    }

    #[test]
    fn reserved_keys_are_neither_sent_nor_reported() {
        let built = build_request(
            EntityKind::Application,
            &bag(json!({
                "name": "app",
                "devices": [{"dev_eui": "0102030405060708"}],
                "integrations": {"influxdb": {}},
                "multicast_groups": [],
                "tenant_id": "t-1"
            })),
        );
        assert_eq!(built.body.len(), 1);
        assert!(built.unknown.is_empty());
    }

    #[test]
    fn server_assigned_id_is_never_in_a_create_body() {
        let built = build_request(EntityKind::Tenant, &bag(json!({"id": "t-1", "name": "T"})));
        assert!(built.body.get("id").is_none());
    }

    #[test]
    fn template_id_is_caller_assigned_and_sent() {
        let built = build_request(
            EntityKind::DeviceProfileTemplate,
            &bag(json!({"id": "vendor-template-1", "name": "tpl", "vendor": "acme"})),
        );
        assert_eq!(built.body["id"], "vendor-template-1");
    }
}
