mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn manual_edits_reconcile_and_keep_payment_history() {
    let workspace = temp_dir("madrasa-fees-update");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Ta'lim B", "category": "talim" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "classId": class_id,
            "firstName": "Yusra",
            "lastName": "Abdi",
            "admissionNo": "ADM021"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.billClass",
        json!({ "classId": class_id, "period": "March 2025", "amount": 3000 }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.list",
        json!({ "classId": class_id, "period": "March 2025" }),
    );
    let fee_record_id = listed
        .pointer("/feeRecords/0/feeRecordId")
        .and_then(|v| v.as_str())
        .expect("feeRecordId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "payments.record",
        json!({
            "feeRecordId": fee_record_id,
            "amount": 1000,
            "method": "cash",
            "paidOn": "2025-03-03"
        }),
    );

    // Raise the recorded paid total to 2500: the delta lands as an
    // adjustment payment, the original row is untouched.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.update",
        json!({ "feeRecordId": fee_record_id, "totalPaid": 2500 }),
    );
    assert_eq!(
        updated.pointer("/record/totalPaid").and_then(|v| v.as_f64()),
        Some(2500.0)
    );
    assert_eq!(
        updated.pointer("/record/balance").and_then(|v| v.as_f64()),
        Some(500.0)
    );
    assert_eq!(
        updated.pointer("/record/status").and_then(|v| v.as_str()),
        Some("partial")
    );

    let payments = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.list",
        json!({ "feeRecordId": fee_record_id }),
    );
    let rows = payments
        .get("payments")
        .and_then(|v| v.as_array())
        .expect("payments");
    assert_eq!(rows.len(), 2);
    let methods: Vec<&str> = rows
        .iter()
        .filter_map(|p| p.get("method").and_then(|v| v.as_str()))
        .collect();
    assert!(methods.contains(&"cash"));
    assert!(methods.contains(&"adjustment"));
    let adjustment = rows
        .iter()
        .find(|p| p.get("method").and_then(|v| v.as_str()) == Some("adjustment"))
        .expect("adjustment row");
    assert_eq!(adjustment.get("amount").and_then(|v| v.as_f64()), Some(1500.0));

    // Re-billing the edited record changes the billed amount too.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "fees.update",
        json!({ "feeRecordId": fee_record_id, "totalBilled": 3500 }),
    );
    assert_eq!(
        updated.pointer("/record/balance").and_then(|v| v.as_f64()),
        Some(1000.0)
    );

    // Editing a billed amount down to zero is invalid.
    let resp = request(
        &mut stdin,
        &mut reader,
        "10",
        "fees.update",
        json!({ "feeRecordId": fee_record_id, "totalBilled": 0 }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/message").and_then(|v| v.as_str()),
        Some("invalid billed amount")
    );

    // Unknown record ids are reported, never a silent no-op.
    let resp = request(
        &mut stdin,
        &mut reader,
        "11",
        "fees.update",
        json!({ "feeRecordId": "no-such-record", "totalBilled": 100 }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = child.kill();
}
