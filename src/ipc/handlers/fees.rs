use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::period::{period_key, Category};
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

fn ledger_err(req: &Request, e: ledger::LedgerError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, None)
}

fn class_category(
    conn: &Connection,
    req: &Request,
    class_id: &str,
) -> Result<Category, serde_json::Value> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT category FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some(raw) = raw else {
        return Err(err(&req.id, "not_found", "class not found", None));
    };
    Category::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_state",
            format!("unknown program category: {}", raw),
            None,
        )
    })
}

/// Bill every active student of a class for one period. Creates the period's
/// fee record where missing, updates the billed amount where it exists, then
/// reconciles each student's ledger.
fn handle_fees_bill_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_str(req, "period") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let amount = req.params.get("amount").and_then(|v| v.as_f64());
    let Some(amount) = amount.filter(|a| a.is_finite() && *a > 0.0) else {
        return err(
            &req.id,
            "bad_params",
            "invalid billed amount",
            Some(json!({ "amount": req.params.get("amount") })),
        );
    };

    let category = match class_category(conn, req, &class_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if period_key(category, &period).is_none() {
        return err(
            &req.id,
            "bad_params",
            format!(
                "period does not match the {} category format",
                category.as_str()
            ),
            Some(json!({ "period": period })),
        );
    }

    let mut stmt = match conn
        .prepare("SELECT id FROM students WHERE class_id = ? AND active = 1 ORDER BY sort_order")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_ids = match stmt
        .query_map([&class_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = Utc::now().to_rfc3339();
    for student_id in &student_ids {
        let record_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO fee_records(id, student_id, period, total_billed, balance, status, updated_at)
             VALUES(?, ?, ?, ?, ?, 'pending', ?)
             ON CONFLICT(student_id, period) DO UPDATE SET
               total_billed = excluded.total_billed,
               updated_at = excluded.updated_at",
            (&record_id, student_id, &period, amount, amount, &now),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "fee_records" })),
            );
        }
        if let Err(e) = ledger::recalculate_carry_forward(conn, student_id) {
            return ledger_err(req, e);
        }
    }

    ok(
        &req.id,
        json!({
            "period": period,
            "amount": amount,
            "billedStudents": student_ids.len()
        }),
    )
}

fn handle_fees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = req
        .params
        .get("period")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let sql = "SELECT f.id, f.student_id, s.last_name, s.first_name, s.admission_no,
                      f.period, COALESCE(f.total_billed, 0),
                      COALESCE((SELECT SUM(p.amount) FROM payments p WHERE p.fee_record_id = f.id), 0),
                      COALESCE(f.balance, 0), f.status
               FROM fee_records f
               JOIN students s ON s.id = f.student_id
               WHERE s.class_id = ?1 AND (?2 IS NULL OR f.period = ?2)
               ORDER BY s.sort_order";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&class_id, &period), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            let admission_no: String = row.get(4)?;
            let period: String = row.get(5)?;
            let total_billed: f64 = row.get(6)?;
            let total_paid: f64 = row.get(7)?;
            let balance: f64 = row.get(8)?;
            let status: String = row.get(9)?;
            Ok(json!({
                "feeRecordId": id,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
                "admissionNo": admission_no,
                "period": period,
                "totalBilled": total_billed,
                "totalPaid": total_paid,
                "balance": balance,
                "status": status
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(records) => ok(&req.id, json!({ "feeRecords": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Chronological statement for one student. Reconciles first so the returned
/// lines always reflect the current payments and bills.
fn handle_fees_statement(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match ledger::recalculate_carry_forward(conn, &student_id) {
        Ok(lines) => {
            let closing = lines.last().map(|l| l.balance).unwrap_or(0.0);
            ok(
                &req.id,
                json!({
                    "studentId": student_id,
                    "lines": lines,
                    "closingBalance": closing
                }),
            )
        }
        Err(e) => ledger_err(req, e),
    }
}

/// Manual correction of one fee record. A new billed amount replaces the
/// stored one; a target paid total is materialized as an adjustment payment
/// for the delta so the payment history stays the source of truth.
fn handle_fees_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fee_record_id = match required_str(req, "feeRecordId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, f64)> = match conn
        .query_row(
            "SELECT f.student_id,
                    COALESCE((SELECT SUM(p.amount) FROM payments p WHERE p.fee_record_id = f.id), 0)
             FROM fee_records f
             WHERE f.id = ?",
            [&fee_record_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, current_paid)) = row else {
        return err(&req.id, "not_found", "fee record not found", None);
    };

    let total_billed = req.params.get("totalBilled").and_then(|v| v.as_f64());
    let total_paid = req.params.get("totalPaid").and_then(|v| v.as_f64());
    if total_billed.is_none() && total_paid.is_none() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }
    // Validate everything before touching either field.
    if let Some(billed) = total_billed {
        if !billed.is_finite() || billed <= 0.0 {
            return err(
                &req.id,
                "bad_params",
                "invalid billed amount",
                Some(json!({ "totalBilled": billed })),
            );
        }
    }
    if let Some(target_paid) = total_paid {
        if !target_paid.is_finite() || target_paid < 0.0 {
            return err(
                &req.id,
                "bad_params",
                "totalPaid must be >= 0",
                Some(json!({ "totalPaid": target_paid })),
            );
        }
    }

    if let Some(billed) = total_billed {
        if let Err(e) = conn.execute(
            "UPDATE fee_records SET total_billed = ?, updated_at = ? WHERE id = ?",
            (billed, Utc::now().to_rfc3339(), &fee_record_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "fee_records" })),
            );
        }
    }

    if let Some(target_paid) = total_paid {
        let delta = target_paid - current_paid;
        if delta != 0.0 {
            let payment_id = Uuid::new_v4().to_string();
            let now = Utc::now();
            if let Err(e) = conn.execute(
                "INSERT INTO payments(id, fee_record_id, amount, method, reference, paid_on, created_at)
                 VALUES(?, ?, ?, 'adjustment', NULL, ?, ?)",
                (
                    &payment_id,
                    &fee_record_id,
                    delta,
                    now.format("%Y-%m-%d").to_string(),
                    now.to_rfc3339(),
                ),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "payments" })),
                );
            }
        }
    }

    match ledger::recalculate_carry_forward(conn, &student_id) {
        Ok(lines) => {
            let updated = lines.iter().find(|l| l.fee_record_id == fee_record_id);
            ok(
                &req.id,
                json!({ "studentId": student_id, "record": updated }),
            )
        }
        Err(e) => ledger_err(req, e),
    }
}

fn handle_fees_recalculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match ledger::recalculate_carry_forward(conn, &student_id) {
        Ok(lines) => ok(
            &req.id,
            json!({ "studentId": student_id, "lines": lines }),
        ),
        Err(e) => ledger_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.billClass" => Some(handle_fees_bill_class(state, req)),
        "fees.list" => Some(handle_fees_list(state, req)),
        "fees.statement" => Some(handle_fees_statement(state, req)),
        "fees.update" => Some(handle_fees_update(state, req)),
        "fees.recalculate" => Some(handle_fees_recalculate(state, req)),
        _ => None,
    }
}
