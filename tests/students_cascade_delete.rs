mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn deleting_a_student_removes_fee_and_assessment_history() {
    let workspace = temp_dir("madrasa-cascade");
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
        json!({ "name": "Hifz B", "category": "tahfidh" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "classId": class_id,
            "firstName": "Imran",
            "lastName": "Said",
            "admissionNo": "ADM030"
        }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.billClass",
        json!({ "classId": class_id, "period": "May 2025", "amount": 2500 }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.list",
        json!({ "classId": class_id }),
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
            "paidOn": "2025-05-02"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.enter",
        json!({
            "studentId": student_id,
            "subject": "Quran",
            "term": "Term 2",
            "assessmentType": "End-Term",
            "marksObtained": 88,
            "totalMarks": 100,
            "enteredBy": "ust.khalid"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.delete",
        json!({ "studentId": student_id }),
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        students.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let fees = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "fees.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        fees.get("feeRecords").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let assessments = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "assessments.list",
        json!({
            "classId": class_id,
            "visibility": "owner",
            "enteredBy": "ust.khalid"
        }),
    );
    assert_eq!(
        assessments
            .get("assessments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The orphaned payments are gone too: the old record id resolves nowhere.
    let resp = request(
        &mut stdin,
        &mut reader,
        "12",
        "payments.list",
        json!({ "feeRecordId": fee_record_id }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    // A statement for the deleted student reports not_found, not an empty
    // ledger.
    let resp = request(
        &mut stdin,
        &mut reader,
        "13",
        "fees.statement",
        json!({ "studentId": student_id }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = child.kill();
}
