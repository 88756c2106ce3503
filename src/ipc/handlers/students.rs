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

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, admission_no, guardian_phone, active, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let admission_no: String = row.get(3)?;
            let guardian_phone: Option<String> = row.get(4)?;
            let active: i64 = row.get(5)?;
            let sort_order: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "admissionNo": admission_no,
                "guardianPhone": guardian_phone,
                "active": active != 0,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let admission_no = match required_str(req, "admissionNo") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if first_name.is_empty() || last_name.is_empty() || admission_no.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "firstName, lastName and admissionNo must not be empty",
            None,
        );
    }
    let guardian_phone = req
        .params
        .get("guardianPhone")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, admission_no,
                              guardian_phone, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            &admission_no,
            &guardian_phone,
            active as i64,
            next_sort,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "sortOrder": next_sort }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = req.params.get("firstName").and_then(|v| v.as_str()) {
        sets.push("first_name = ?");
        values.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("lastName").and_then(|v| v.as_str()) {
        sets.push("last_name = ?");
        values.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("admissionNo").and_then(|v| v.as_str()) {
        sets.push("admission_no = ?");
        values.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("guardianPhone").and_then(|v| v.as_str()) {
        sets.push("guardian_phone = ?");
        values.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("active").and_then(|v| v.as_bool()) {
        sets.push("active = ?");
        values.push(rusqlite::types::Value::Integer(v as i64));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }
    sets.push("updated_at = ?");
    values.push(rusqlite::types::Value::Text(Utc::now().to_rfc3339()));
    values.push(rusqlite::types::Value::Text(student_id.clone()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (i, v) in ids.iter().enumerate() {
        let Some(sid) = v.as_str() else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                "studentIds must contain only strings",
                None,
            );
        };
        let updated = match tx.execute(
            "UPDATE students SET sort_order = ? WHERE id = ? AND class_id = ?",
            (i as i64, sid, &class_id),
        ) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        };
        if updated == 0 {
            let _ = tx.rollback();
            return err(
                &req.id,
                "not_found",
                "student not found in class",
                Some(json!({ "studentId": sid })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "reordered": ids.len() }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Deleting a student takes its fee and assessment history with it.
    if let Err(e) = tx.execute(
        "DELETE FROM payments
         WHERE fee_record_id IN (SELECT id FROM fee_records WHERE student_id = ?)",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM fee_records WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_records" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM assessments WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.reorder" => Some(handle_students_reorder(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
