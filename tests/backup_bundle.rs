mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn export_then_import_round_trips_the_workspace() {
    let workspace_a = temp_dir("madrasa-backup-src");
    let workspace_b = temp_dir("madrasa-backup-dst");
    let bundle_path = temp_dir("madrasa-backup-out").join("school.madrasa.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Ta'lim A", "category": "talim" }),
    );
    let class_name = class.get("name").and_then(|v| v.as_str()).expect("name");
    assert_eq!(class_name, "Ta'lim A");

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("madrasa-workspace-v1")
    );
    let sha = exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(bundle_path.is_file());

    // Import into a fresh workspace and find the same data there.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace_b.to_string_lossy() }),
    );
    let before = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(
        before.get("classes").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("dbSha256").and_then(|v| v.as_str()),
        Some(sha)
    );

    let after = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    let classes = after
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(
        classes[0].get("name").and_then(|v| v.as_str()),
        Some("Ta'lim A")
    );
    assert_eq!(
        classes[0].get("category").and_then(|v| v.as_str()),
        Some("talim")
    );

    let _ = child.kill();
}
