//! End-to-end provisioning runs against the in-memory API.

use serde_json::{json, Value};

use chirpstack_provision::api::mock::InjectedFailure;
use chirpstack_provision::engine::ProvisioningEngine;
use chirpstack_provision::{EntityKind, MockApi, SetupDocument};

fn doc(value: Value) -> SetupDocument {
    SetupDocument::from_value(value).unwrap()
}

#[tokio::test]
async fn tenant_and_gateway_scenario_backfills_the_document() {
    let api = MockApi::new();
    let mut document = doc(json!({
        "tenants": [{
            "name": "T",
            "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}]
        }]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    // The tenant got the server-assigned identifier, at its source
    // position in the tree.
    assert_eq!(document.root()["tenants"][0]["id"], "tenant-1");
    // The gateway's hardware EUI is untouched by provisioning.
    assert_eq!(
        document.root()["tenants"][0]["gateways"][0]["gatewayId"],
        "0102030405060708"
    );
    // The gateway was submitted with the freshly resolved parent.
    let gateway_calls = api.calls_for("gateway");
    assert_eq!(gateway_calls.len(), 1);
    assert_eq!(gateway_calls[0].body["tenantId"], "tenant-1");

    assert_eq!(report.counts(EntityKind::Tenant).created, 1);
    assert_eq!(report.counts(EntityKind::Gateway).created, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn preexisting_identifiers_are_reused_and_never_created() {
    let api = MockApi::new();
    let mut document = doc(json!({
        "tenants": [{
            "id": "t-restored",
            "name": "T",
            "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}],
            "applications": [{"id": "app-restored", "name": "app"}]
        }]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    assert!(api.calls_for("tenant").is_empty());
    assert!(api.calls_for("application").is_empty());
    assert_eq!(report.counts(EntityKind::Tenant).reused, 1);
    assert_eq!(report.counts(EntityKind::Application).reused, 1);

    // Dependents carry the reused identifier.
    let gateway_calls = api.calls_for("gateway");
    assert_eq!(gateway_calls[0].body["tenantId"], "t-restored");
}

#[tokio::test]
async fn failed_device_profile_does_not_block_siblings() {
    let api = MockApi::new();
    api.fail("device_profile", "bad-profile", InjectedFailure::Unavailable);
    let mut document = doc(json!({
        "tenants": [{
            "name": "T",
            "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}],
            "device_profiles": [
                {"name": "bad-profile", "region": "EU868", "macVersion": "LORAWAN_1_0_3"},
                {"name": "good-profile", "region": "EU868", "macVersion": "LORAWAN_1_0_3"}
            ],
            "applications": [{"name": "app"}]
        }]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    assert_eq!(report.counts(EntityKind::DeviceProfile).failed, 1);
    assert_eq!(report.counts(EntityKind::DeviceProfile).created, 1);
    // Siblings under the same tenant still went through.
    assert_eq!(report.counts(EntityKind::Gateway).created, 1);
    assert_eq!(report.counts(EntityKind::Application).created, 1);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn authentication_failure_halts_the_run() {
    let api = MockApi::new();
    api.fail("tenant", "First", InjectedFailure::Unauthenticated);
    let mut document = doc(json!({
        "tenants": [
            {"name": "First", "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}]},
            {"name": "Second"}
        ],
        "users": [{"email": "ops@example.com"}]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    assert!(report.fatal.is_some());
    assert_eq!(report.counts(EntityKind::Tenant).failed, 1);
    assert_eq!(report.counts(EntityKind::Tenant).skipped, 1);
    assert_eq!(report.counts(EntityKind::User).skipped, 1);
    assert_eq!(report.counts(EntityKind::Gateway).skipped, 1);
    // Nothing was submitted after the fatal error.
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn full_tree_is_submitted_in_topological_order() {
    let api = MockApi::new();
    let mut document = doc(json!({
        "tenants": [{
            "name": "T",
            "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}],
            "device_profiles": [
                {"name": "class-a", "region": "EU868", "macVersion": "LORAWAN_1_0_3"}
            ],
            "applications": [{
                "name": "app",
                "integrations": {"influxdb": {"version": "INFLUXDB_2"}},
                "devices": [{
                    "dev_eui": "1112131415161718",
                    "name": "sensor",
                    "device_profile": "class-a",
                    "deviceKeys": {"nwkKey": "000102030405060708090a0b0c0d0e0f"}
                }]
            }]
        }],
        "users": [{"email": "ops@example.com"}],
        "device_profile_templates": [{"id": "tpl-1", "name": "tpl", "vendor": "acme"}]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();
    assert!(report.is_clean(), "unexpected failures: {report}");

    let kinds: Vec<&str> = api.calls().iter().map(|c| c.kind).collect();
    let position = |kind: &str| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position("tenant") < position("gateway"));
    assert!(position("tenant") < position("device_profile"));
    assert!(position("device_profile") < position("application"));
    assert!(position("application") < position("integration"));
    assert!(position("integration") < position("device"));
    assert!(position("device") < position("device_keys"));

    // The device create carried both resolved parents.
    let device_calls = api.calls_for("device");
    assert_eq!(device_calls[0].body["applicationId"], document.root()["tenants"][0]["applications"][0]["id"]);
    assert_eq!(
        device_calls[0].body["deviceProfileId"],
        document.root()["tenants"][0]["device_profiles"][0]["id"]
    );
    // Keys went to the device's EUI.
    assert_eq!(api.calls_for("device_keys")[0].body["devEui"], "1112131415161718");
}

#[tokio::test]
async fn rewrite_is_a_minimal_patch_of_the_input() {
    let api = MockApi::new();
    let input = json!({
        "tenants": [{
            "name": "T",
            "customKnob": {"nested": [1, 2, 3]},
            "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}]
        }],
        "unmodeled_top_level": "survives"
    });
    let mut document = doc(input.clone());

    ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    // Adding the resolved tenant id to the input reproduces the output
    // exactly: nothing else moved, nothing was dropped.
    let mut expected = input;
    expected["tenants"][0]["id"] = json!("tenant-1");
    assert_eq!(document.root(), &expected);
}

#[tokio::test]
async fn unresolvable_profile_reference_fails_only_the_device() {
    let api = MockApi::new();
    let mut document = doc(json!({
        "tenants": [{
            "name": "T",
            "applications": [{
                "name": "app",
                "devices": [
                    {"dev_eui": "1112131415161718", "name": "orphan", "device_profile": "no-such-profile"},
                    {"dev_eui": "2122232425262728", "name": "direct", "deviceProfileId": "profile-external"}
                ]
            }]
        }]
    }));

    let report = ProvisioningEngine::new(&api)
        .run(&mut document)
        .await
        .unwrap();

    assert_eq!(report.counts(EntityKind::Device).failed, 1);
    assert_eq!(report.counts(EntityKind::Device).created, 1);
    let device_calls = api.calls_for("device");
    assert_eq!(device_calls.len(), 1);
    assert_eq!(device_calls[0].body["deviceProfileId"], "profile-external");
}
