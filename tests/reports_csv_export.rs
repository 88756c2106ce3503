mod test_support;

use serde_json::json;
use std::fs;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn fee_statement_and_collection_csv_files() {
    let workspace = temp_dir("madrasa-reports");
    let out_dir = temp_dir("madrasa-reports-out");
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
        json!({ "name": "4 East", "category": "integrated" }),
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
            "firstName": "Amina",
            "lastName": "Yusuf",
            "admissionNo": "ADM001"
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
        json!({ "classId": class_id, "period": "Term 1/2025", "amount": 3000 }),
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
            "amount": 1200,
            "method": "cash",
            "paidOn": "2025-02-01"
        }),
    );

    let statement_path = out_dir.join("ADM001-statement.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.feeStatementCsv",
        json!({
            "studentId": student_id,
            "outPath": statement_path.to_string_lossy()
        }),
    );
    assert_eq!(exported.get("rows").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        exported.get("closingBalance").and_then(|v| v.as_f64()),
        Some(1800.0)
    );
    let csv = fs::read_to_string(&statement_path).expect("read statement csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("period,billed,effectiveBilled,paid,balance,status")
    );
    assert_eq!(lines.next(), Some("Term 1/2025,3000,3000,1200,1800,partial"));
    assert_eq!(lines.next(), None);

    // A finalized assessment slice renders as a ranked collection CSV.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assessments.enter",
        json!({
            "studentId": student_id,
            "subject": "Math",
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "marksObtained": 72,
            "totalMarks": 100,
            "enteredBy": "ust.khalid"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assessments.finalize",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term"
        }),
    );

    let collection_path = out_dir.join("4east-midterm.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "reports.collectionCsv",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "visibility": "public",
            "outPath": collection_path.to_string_lossy()
        }),
    );
    assert_eq!(exported.get("rows").and_then(|v| v.as_i64()), Some(1));
    let csv = fs::read_to_string(&collection_path).expect("read collection csv");
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("rank,admissionNo,student,Math,total,of"));
    assert_eq!(lines.next(), Some("1,ADM001,\"Yusuf, Amina\",72,72,1"));
    assert_eq!(lines.next(), None);

    let _ = child.kill();
}
