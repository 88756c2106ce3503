use crate::collect::{grade_for, normalize_assessment_type, Visibility};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn parse_visibility(req: &Request) -> Result<(Visibility, Option<String>), serde_json::Value> {
    let visibility = match req.params.get("visibility").and_then(|v| v.as_str()) {
        Some(raw) => Visibility::parse(raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "visibility must be one of: owner, public",
                Some(json!({ "visibility": raw })),
            )
        })?,
        None => Visibility::PublicView,
    };
    let entered_by = req
        .params
        .get("enteredBy")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());
    if visibility == Visibility::OwnerView && entered_by.is_none() {
        return Err(err(
            &req.id,
            "bad_params",
            "owner visibility requires enteredBy",
            None,
        ));
    }
    Ok((visibility, entered_by))
}

/// Append one assessment entry. Entries are never overwritten: re-entering a
/// subject adds a row and the collection aggregator sums them.
fn handle_assessments_enter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if subject.is_empty() || term.is_empty() {
        return err(&req.id, "bad_params", "subject and term must not be empty", None);
    }
    let assessment_type = match required_str(req, "assessmentType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(assessment_type) = normalize_assessment_type(&assessment_type) else {
        return err(
            &req.id,
            "bad_params",
            "assessmentType must be one of: Open-Term, Mid-Term, End-Term",
            Some(json!({ "assessmentType": assessment_type })),
        );
    };
    let entered_by = match required_str(req, "enteredBy") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };

    let marks_obtained = req.params.get("marksObtained").and_then(|v| v.as_f64());
    let total_marks = req.params.get("totalMarks").and_then(|v| v.as_f64());
    let Some(marks_obtained) = marks_obtained.filter(|m| m.is_finite() && *m >= 0.0) else {
        return err(&req.id, "bad_params", "marksObtained must be >= 0", None);
    };
    let Some(total_marks) = total_marks.filter(|m| m.is_finite() && *m > 0.0) else {
        return err(&req.id, "bad_params", "totalMarks must be > 0", None);
    };
    if marks_obtained > total_marks {
        return err(
            &req.id,
            "bad_params",
            "marksObtained must not exceed totalMarks",
            Some(json!({ "marksObtained": marks_obtained, "totalMarks": total_marks })),
        );
    }

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let grade = grade_for(marks_obtained, total_marks);
    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, student_id, subject, term, assessment_type,
                                 marks_obtained, total_marks, grade, finalized,
                                 entered_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        (
            &assessment_id,
            &student_id,
            &subject,
            &term,
            assessment_type,
            marks_obtained,
            total_marks,
            grade,
            &entered_by,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "grade": grade }),
    )
}

fn handle_assessments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_id = match required_str(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(f64, f64, i64)> = match conn
        .query_row(
            "SELECT COALESCE(marks_obtained, 0), COALESCE(total_marks, 0), finalized
             FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_marks, current_total, finalized)) = row else {
        return err(&req.id, "not_found", "assessment not found", None);
    };
    if finalized != 0 {
        return err(
            &req.id,
            "bad_state",
            "finalized assessments cannot be edited",
            None,
        );
    }

    let marks_obtained = req
        .params
        .get("marksObtained")
        .and_then(|v| v.as_f64())
        .unwrap_or(current_marks);
    let total_marks = req
        .params
        .get("totalMarks")
        .and_then(|v| v.as_f64())
        .unwrap_or(current_total);
    if !marks_obtained.is_finite() || marks_obtained < 0.0 {
        return err(&req.id, "bad_params", "marksObtained must be >= 0", None);
    }
    if !total_marks.is_finite() || total_marks <= 0.0 {
        return err(&req.id, "bad_params", "totalMarks must be > 0", None);
    }
    if marks_obtained > total_marks {
        return err(
            &req.id,
            "bad_params",
            "marksObtained must not exceed totalMarks",
            None,
        );
    }

    let grade = grade_for(marks_obtained, total_marks);
    if let Err(e) = conn.execute(
        "UPDATE assessments
         SET marks_obtained = ?, total_marks = ?, grade = ?, updated_at = ?
         WHERE id = ?",
        (
            marks_obtained,
            total_marks,
            grade,
            Utc::now().to_rfc3339(),
            &assessment_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    ok(&req.id, json!({ "assessmentId": assessment_id, "grade": grade }))
}

/// Mark a teacher's slice (class + term + type) as finalized, exposing it to
/// students and cross-teacher views.
fn handle_assessments_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_type = match required_str(req, "assessmentType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(assessment_type) = normalize_assessment_type(&assessment_type) else {
        return err(
            &req.id,
            "bad_params",
            "assessmentType must be one of: Open-Term, Mid-Term, End-Term",
            None,
        );
    };
    let entered_by = req
        .params
        .get("enteredBy")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());

    let updated = match conn.execute(
        "UPDATE assessments
         SET finalized = 1, updated_at = ?1
         WHERE term = ?2 AND assessment_type = ?3
           AND student_id IN (SELECT id FROM students WHERE class_id = ?4)
           AND (?5 IS NULL OR entered_by = ?5)",
        (
            Utc::now().to_rfc3339(),
            &term,
            assessment_type,
            &class_id,
            &entered_by,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "assessments" })),
            )
        }
    };

    ok(&req.id, json!({ "finalized": updated }))
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (visibility, entered_by) = match parse_visibility(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = req
        .params
        .get("term")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    // Owner view: the entering teacher's own rows, finalized or not.
    // Public view: finalized rows only, optionally narrowed to one teacher.
    let sql = match visibility {
        Visibility::OwnerView => {
            "SELECT a.id, a.student_id, a.subject, a.term, a.assessment_type,
                    COALESCE(a.marks_obtained, 0), COALESCE(a.total_marks, 0),
                    a.grade, a.finalized, a.entered_by
             FROM assessments a
             JOIN students s ON s.id = a.student_id
             WHERE s.class_id = ?1 AND (?2 IS NULL OR a.term = ?2) AND a.entered_by = ?3
             ORDER BY s.sort_order, a.subject"
        }
        Visibility::PublicView => {
            "SELECT a.id, a.student_id, a.subject, a.term, a.assessment_type,
                    COALESCE(a.marks_obtained, 0), COALESCE(a.total_marks, 0),
                    a.grade, a.finalized, a.entered_by
             FROM assessments a
             JOIN students s ON s.id = a.student_id
             WHERE s.class_id = ?1 AND (?2 IS NULL OR a.term = ?2) AND a.finalized = 1
               AND (?3 IS NULL OR a.entered_by = ?3)
             ORDER BY s.sort_order, a.subject"
        }
    };
    let entered_by_param = entered_by;

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&class_id, &term, &entered_by_param), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let subject: String = row.get(2)?;
            let term: String = row.get(3)?;
            let assessment_type: String = row.get(4)?;
            let marks_obtained: f64 = row.get(5)?;
            let total_marks: f64 = row.get(6)?;
            let grade: String = row.get(7)?;
            let finalized: i64 = row.get(8)?;
            let entered_by: Option<String> = row.get(9)?;
            Ok(json!({
                "assessmentId": id,
                "studentId": student_id,
                "subject": subject,
                "term": term,
                "assessmentType": assessment_type,
                "marksObtained": marks_obtained,
                "totalMarks": total_marks,
                "grade": grade,
                "finalized": finalized != 0,
                "enteredBy": entered_by
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assessments) => ok(&req.id, json!({ "assessments": assessments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.enter" => Some(handle_assessments_enter(state, req)),
        "assessments.update" => Some(handle_assessments_update(state, req)),
        "assessments.finalize" => Some(handle_assessments_finalize(state, req)),
        "assessments.list" => Some(handle_assessments_list(state, req)),
        _ => None,
    }
}
