use crate::period::{compare_periods, Category};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Settlement state of one fee record after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Overpayment,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Pending => "pending",
            FeeStatus::Partial => "partial",
            FeeStatus::Paid => "paid",
            FeeStatus::Overpayment => "overpayment",
        }
    }
}

/// Status is a pure function of the carried bill and the paid total.
pub fn classify(effective_billed: f64, total_paid: f64) -> FeeStatus {
    if total_paid > effective_billed {
        FeeStatus::Overpayment
    } else if total_paid == effective_billed && effective_billed > 0.0 {
        FeeStatus::Paid
    } else if total_paid > 0.0 {
        FeeStatus::Partial
    } else {
        FeeStatus::Pending
    }
}

/// Numeric fields loaded from storage may be NULL or NaN; both read as 0.
fn num(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// One fee record as loaded for reconciliation. `total_paid` is the payment
/// sum projection, not a stored field.
#[derive(Debug, Clone)]
pub struct FeeRow {
    pub id: String,
    pub period: String,
    pub total_billed: f64,
    pub total_paid: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerLine {
    pub fee_record_id: String,
    pub period: String,
    pub total_billed: f64,
    pub effective_billed: f64,
    pub total_paid: f64,
    pub balance: f64,
    pub status: FeeStatus,
}

/// Carry-forward chain over one student's fee records. Sorts by the period
/// contract for the category, then folds the running balance through the
/// sequence: underpayment is added to the next period's bill, overpayment
/// (negative balance) is credited to it. The stored `total_billed` is left
/// as the un-carried amount; only effective billed, balance and status see
/// the carry.
pub fn carry_forward(category: Category, rows: &[FeeRow]) -> Vec<LedgerLine> {
    let mut ordered: Vec<&FeeRow> = rows.iter().collect();
    ordered.sort_by(|a, b| compare_periods(category, &a.period, &b.period));

    let mut carry = 0.0;
    let mut out = Vec::with_capacity(ordered.len());
    for row in ordered {
        let total_billed = num(row.total_billed);
        let total_paid = num(row.total_paid);
        let effective_billed = total_billed + carry;
        let balance = effective_billed - total_paid;
        let status = classify(effective_billed, total_paid);
        out.push(LedgerLine {
            fee_record_id: row.id.clone(),
            period: row.period.clone(),
            total_billed,
            effective_billed,
            total_paid,
            balance,
            status,
        });
        carry = balance;
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub code: String,
    pub message: String,
}

impl LedgerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Recompute and persist balance/status for every fee record of one student.
/// Must run after every mutation that touches the student's fee totals (bill
/// upsert, payment, manual edit). Idempotent: with no intervening mutation a
/// second run rewrites identical values. Returns the reconciled lines in
/// chronological order.
pub fn recalculate_carry_forward(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<LedgerLine>, LedgerError> {
    let category_raw: Option<String> = conn
        .query_row(
            "SELECT c.category
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;
    let Some(category_raw) = category_raw else {
        return Err(LedgerError::new("not_found", "student not found"));
    };
    let Some(category) = Category::parse(&category_raw) else {
        return Err(LedgerError::new(
            "bad_state",
            format!("unknown program category: {}", category_raw),
        ));
    };

    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.period,
                    COALESCE(f.total_billed, 0),
                    COALESCE((SELECT SUM(p.amount) FROM payments p WHERE p.fee_record_id = f.id), 0)
             FROM fee_records f
             WHERE f.student_id = ?",
        )
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;
    let rows: Vec<FeeRow> = stmt
        .query_map([student_id], |r| {
            Ok(FeeRow {
                id: r.get(0)?,
                period: r.get(1)?,
                total_billed: r.get(2)?,
                total_paid: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| LedgerError::new("db_query_failed", e.to_string()))?;

    let lines = carry_forward(category, &rows);

    let now = Utc::now().to_rfc3339();
    for line in &lines {
        conn.execute(
            "UPDATE fee_records SET balance = ?, status = ?, updated_at = ? WHERE id = ?",
            (
                line.balance,
                line.status.as_str(),
                &now,
                &line.fee_record_id,
            ),
        )
        .map_err(|e| LedgerError::new("db_update_failed", e.to_string()))?;
    }

    Ok(lines)
}
