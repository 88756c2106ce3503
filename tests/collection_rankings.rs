mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn setup_class(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    workspace: &std::path::Path,
) -> (String, Vec<String>) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "setup-class",
        "classes.create",
        json!({ "name": "4 East", "category": "integrated" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, (first, last, adm)) in [
        ("Amina", "Yusuf", "ADM001"),
        ("Bilal", "Omar", "ADM002"),
        ("Halima", "Noor", "ADM003"),
    ]
    .iter()
    .enumerate()
    {
        let student = request_ok(
            stdin,
            reader,
            &format!("setup-student-{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "firstName": first,
                "lastName": last,
                "admissionNo": adm
            }),
        );
        student_ids.push(
            student
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    (class_id, student_ids)
}

#[test]
fn collection_ranks_and_finalization_gating() {
    let workspace = temp_dir("madrasa-collections");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, student_ids) = setup_class(&mut stdin, &mut reader, &workspace);

    // ust.khalid enters Mid-Term marks: Amina gets Quran twice (40 + 35,
    // summed by the aggregator), Halima gets nothing and must not appear.
    let entries = [
        (&student_ids[0], "Math", 70.0),
        (&student_ids[0], "Quran", 40.0),
        (&student_ids[0], "Quran", 35.0),
        (&student_ids[1], "Math", 90.0),
    ];
    for (i, (student_id, subject, marks)) in entries.iter().enumerate() {
        let entered = request_ok(
            &mut stdin,
            &mut reader,
            &format!("enter-{}", i),
            "assessments.enter",
            json!({
                "studentId": student_id,
                "subject": subject,
                "term": "Term 1",
                "assessmentType": "Mid-Term",
                "marksObtained": marks,
                "totalMarks": 100,
                "enteredBy": "ust.khalid"
            }),
        );
        assert!(entered.get("grade").and_then(|v| v.as_str()).is_some());
    }

    // Owner view sees the unfinalized slice.
    let owner = request_ok(
        &mut stdin,
        &mut reader,
        "owner",
        "collections.generate",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "visibility": "owner",
            "enteredBy": "ust.khalid"
        }),
    );
    let rows = owner
        .get("collections")
        .and_then(|v| v.as_array())
        .expect("collections");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        rows[0].get("admissionNumber").and_then(|v| v.as_str()),
        Some("ADM001")
    );
    assert_eq!(rows[0].get("totalMarks").and_then(|v| v.as_f64()), Some(145.0));
    assert_eq!(
        rows[0].pointer("/subjectMarks/Quran").and_then(|v| v.as_f64()),
        Some(75.0)
    );
    assert_eq!(rows[1].get("rank").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(rows[1].get("totalMarks").and_then(|v| v.as_f64()), Some(90.0));
    // Only participating students count toward the rank base.
    assert_eq!(rows[0].get("totalStudents").and_then(|v| v.as_i64()), Some(2));

    // Nothing is public until the slice is finalized.
    let public = request_ok(
        &mut stdin,
        &mut reader,
        "public-before",
        "collections.generate",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "visibility": "public"
        }),
    );
    assert_eq!(
        public
            .get("collections")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let finalized = request_ok(
        &mut stdin,
        &mut reader,
        "finalize",
        "assessments.finalize",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "enteredBy": "ust.khalid"
        }),
    );
    assert_eq!(finalized.get("finalized").and_then(|v| v.as_i64()), Some(4));

    let public = request_ok(
        &mut stdin,
        &mut reader,
        "public-after",
        "collections.generate",
        json!({
            "classId": class_id,
            "term": "Term 1",
            "assessmentType": "Mid-Term",
            "visibility": "public"
        }),
    );
    let rows = public
        .get("collections")
        .and_then(|v| v.as_array())
        .expect("collections");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("totalMarks").and_then(|v| v.as_f64()), Some(145.0));

    let _ = child.kill();
}

#[test]
fn average_collection_is_two_stage() {
    let workspace = temp_dir("madrasa-average");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, student_ids) = setup_class(&mut stdin, &mut reader, &workspace);

    let entries = [
        ("Math", "Term 1", "Open-Term", 80.0),
        ("Math", "Term 1", "Mid-Term", 90.0),
        ("English", "Term 1", "Open-Term", 70.0),
    ];
    for (i, (subject, term, kind, marks)) in entries.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("enter-{}", i),
            "assessments.enter",
            json!({
                "studentId": student_ids[0],
                "subject": subject,
                "term": term,
                "assessmentType": kind,
                "marksObtained": marks,
                "totalMarks": 100,
                "enteredBy": "ust.maryam"
            }),
        );
    }

    let average = request_ok(
        &mut stdin,
        &mut reader,
        "average",
        "collections.average",
        json!({
            "classId": class_id,
            "assessmentTypes": ["Open-Term", "Mid-Term"],
            "visibility": "owner",
            "enteredBy": "ust.maryam"
        }),
    );
    let rows = average
        .get("collections")
        .and_then(|v| v.as_array())
        .expect("collections");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].pointer("/subjectMarks/Math").and_then(|v| v.as_f64()),
        Some(85.0)
    );
    assert_eq!(
        rows[0].pointer("/subjectMarks/English").and_then(|v| v.as_f64()),
        Some(70.0)
    );
    assert_eq!(rows[0].get("totalMarks").and_then(|v| v.as_f64()), Some(155.0));
    assert_eq!(rows[0].get("term").and_then(|v| v.as_str()), Some("Average"));
    assert_eq!(rows[0].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(rows[0].get("totalStudents").and_then(|v| v.as_i64()), Some(1));

    let _ = child.kill();
}
