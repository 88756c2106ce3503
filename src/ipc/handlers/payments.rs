use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use chrono::{NaiveDate, Utc};
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

/// Append one payment to a fee record and reconcile the student's ledger.
/// Payments are immutable; corrections go through fees.update as adjustment
/// rows.
fn handle_payments_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fee_record_id = match required_str(req, "feeRecordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let method = match required_str(req, "method") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if method.is_empty() {
        return err(&req.id, "bad_params", "method must not be empty", None);
    }
    let paid_on = match required_str(req, "paidOn") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if NaiveDate::parse_from_str(&paid_on, "%Y-%m-%d").is_err() {
        return err(
            &req.id,
            "bad_params",
            "paidOn must be a YYYY-MM-DD date",
            Some(json!({ "paidOn": paid_on })),
        );
    }
    let amount = req.params.get("amount").and_then(|v| v.as_f64());
    let Some(amount) = amount.filter(|a| a.is_finite() && *a > 0.0) else {
        return err(
            &req.id,
            "bad_params",
            "amount must be > 0",
            Some(json!({ "amount": req.params.get("amount") })),
        );
    };
    let reference = req
        .params
        .get("reference")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());

    let student_id: Option<String> = match conn
        .query_row(
            "SELECT student_id FROM fee_records WHERE id = ?",
            [&fee_record_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(&req.id, "not_found", "fee record not found", None);
    };

    let payment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO payments(id, fee_record_id, amount, method, reference, paid_on, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &fee_record_id,
            amount,
            &method,
            &reference,
            &paid_on,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }

    match ledger::recalculate_carry_forward(conn, &student_id) {
        Ok(lines) => {
            let record = lines.iter().find(|l| l.fee_record_id == fee_record_id);
            ok(
                &req.id,
                json!({
                    "paymentId": payment_id,
                    "studentId": student_id,
                    "record": record
                }),
            )
        }
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fee_record_id = match required_str(req, "feeRecordId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM fee_records WHERE id = ?",
            [&fee_record_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "fee record not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT id, COALESCE(amount, 0), method, reference, paid_on
         FROM payments
         WHERE fee_record_id = ?
         ORDER BY paid_on, created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&fee_record_id], |row| {
            let id: String = row.get(0)?;
            let amount: f64 = row.get(1)?;
            let method: String = row.get(2)?;
            let reference: Option<String> = row.get(3)?;
            let paid_on: String = row.get(4)?;
            Ok(json!({
                "paymentId": id,
                "amount": amount,
                "method": method,
                "reference": reference,
                "paidOn": paid_on
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(handle_payments_record(state, req)),
        "payments.list" => Some(handle_payments_list(state, req)),
        _ => None,
    }
}
