use crate::collect::{generate_collection_rows, normalize_assessment_type};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::collections;

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

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn write_csv(req: &Request, out_path: &PathBuf, content: &str) -> Option<serde_json::Value> {
    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return Some(err(&req.id, "io_failed", e.to_string(), None));
        }
    }
    if let Err(e) = std::fs::write(out_path, content) {
        return Some(err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "outPath": out_path.to_string_lossy() })),
        ));
    }
    None
}

/// Fee statement CSV for one student, one line per period in chronological
/// order. Reconciles before rendering so the export never shows stale
/// balances.
fn handle_fee_statement_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    let lines = match ledger::recalculate_carry_forward(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    let mut csv = String::from("period,billed,effectiveBilled,paid,balance,status\n");
    for line in &lines {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&line.period),
            line.total_billed,
            line.effective_billed,
            line.total_paid,
            line.balance,
            line.status.as_str()
        ));
    }
    if let Some(resp) = write_csv(req, &out_path, &csv) {
        return resp;
    }

    ok(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "rows": lines.len(),
            "closingBalance": lines.last().map(|l| l.balance).unwrap_or(0.0)
        }),
    )
}

/// Collection (ranked class standings) CSV: one line per participating
/// student, one column per subject seen in the slice.
fn handle_collection_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let (visibility, entered_by) = match collections::parse_visibility(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = match collections::class_name(conn, req, &class_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roster = match collections::load_roster(conn, req, &class_id, &name) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entries = match collections::load_visible_entries(
        conn,
        req,
        &class_id,
        &[assessment_type],
        visibility,
        entered_by.as_deref(),
    ) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = generate_collection_rows(&entries, &roster, &name, &term);

    let subjects: BTreeSet<String> = rows
        .iter()
        .flat_map(|r| r.subject_marks.keys().cloned())
        .collect();

    let mut csv = String::from("rank,admissionNo,student");
    for subject in &subjects {
        csv.push(',');
        csv.push_str(&csv_field(subject));
    }
    csv.push_str(",total,of\n");
    for row in &rows {
        csv.push_str(&format!(
            "{},{},{}",
            row.rank,
            csv_field(&row.admission_number),
            csv_field(&row.student_name)
        ));
        for subject in &subjects {
            csv.push(',');
            if let Some(marks) = row.subject_marks.get(subject) {
                csv.push_str(&marks.to_string());
            }
        }
        csv.push_str(&format!(",{},{}\n", row.total_marks, row.total_students));
    }
    if let Some(resp) = write_csv(req, &out_path, &csv) {
        return resp;
    }

    ok(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "rows": rows.len(),
            "subjects": subjects.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.feeStatementCsv" => Some(handle_fee_statement_csv(state, req)),
        "reports.collectionCsv" => Some(handle_collection_csv(state, req)),
        _ => None,
    }
}
