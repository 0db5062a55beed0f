//! File-level validation flows: JSON, JSON-Lines, and CSV inputs.

use std::fs;
use std::path::PathBuf;

use chirpstack_provision::validate::validate_file;
use chirpstack_provision::{SchemaKind, SchemaRegistry};

fn registry() -> SchemaRegistry {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas");
    SchemaRegistry::from_dir(&dir).unwrap()
}

#[test]
fn json_array_of_records_is_validated_per_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    fs::write(
        &path,
        r#"[
            {"dev_eui": "0102030405060708", "name": "ok"},
            {"dev_eui": "xyz", "name": "bad-eui"},
            {"gatewayId": "1112131415161718", "name": "a-gateway"}
        ]"#,
    )
    .unwrap();

    let report = validate_file(&registry(), SchemaKind::Records, &path).unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.valid(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 2);
}

#[test]
fn jsonl_reports_parse_errors_without_stopping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.jsonl");
    fs::write(
        &path,
        concat!(
            "{\"dev_eui\": \"0102030405060708\", \"name\": \"ok\"}\n",
            "this is not json\n",
            "\n",
            "{\"dev_eui\": \"2122232425262728\", \"name\": \"also ok\"}\n",
        ),
    )
    .unwrap();

    let report = validate_file(&registry(), SchemaKind::Records, &path).unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.valid(), 2);
    assert_eq!(report.failures[0].line, 2);
    assert!(report.failures[0].violations.violations[0]
        .message
        .contains("invalid JSON"));
}

#[test]
fn csv_cells_are_coerced_to_schema_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateways.csv");
    fs::write(
        &path,
        "gatewayId,name,statsInterval\n\
         0102030405060708,gw-0,30\n\
         1112131415161718,gw-1,\n",
    )
    .unwrap();

    let report = validate_file(&registry(), SchemaKind::Records, &path).unwrap();
    assert_eq!(report.total, 2, "failures: {:?}", report.failures);
    assert!(report.is_clean(), "failures: {:?}", report.failures);
}

#[test]
fn csv_with_untypeable_cell_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateways.csv");
    fs::write(
        &path,
        "gatewayId,name,statsInterval\n0102030405060708,gw-0,soon\n",
    )
    .unwrap();

    let report = validate_file(&registry(), SchemaKind::Records, &path).unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.valid(), 0);
    assert_eq!(report.failures[0].line, 1);
}

#[test]
fn setup_documents_validate_as_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prod-setup.json");
    fs::write(
        &path,
        r#"{"tenants": [{"name": "T", "gateways": [{"gatewayId": "0102030405060708", "name": "gw"}]}]}"#,
    )
    .unwrap();

    let kind = SchemaKind::detect(&path);
    assert_eq!(kind, SchemaKind::Setup);
    let report = validate_file(&registry(), kind, &path).unwrap();
    assert_eq!(report.total, 1);
    assert!(report.is_clean());
}

#[test]
fn invalid_setup_document_reports_every_violation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken-setup.json");
    fs::write(
        &path,
        r#"{"tenants": [
            {"name": "", "maxDeviceCount": -1},
            {"description": "tenant without a name"}
        ]}"#,
    )
    .unwrap();

    let report = validate_file(&registry(), SchemaKind::Setup, &path).unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.failures.len(), 1);
    // One entry, several violations, all reported together.
    assert!(report.failures[0].violations.len() >= 3);
}
