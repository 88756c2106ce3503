use crate::collect::{
    generate_average_collection_rows, generate_collection_rows, normalize_assessment_type,
    AssessmentEntry, RosterStudent, Visibility,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

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

pub(super) fn parse_visibility(req: &Request) -> Result<(Visibility, Option<String>), serde_json::Value> {
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

pub(super) fn class_name(
    conn: &Connection,
    req: &Request,
    class_id: &str,
) -> Result<String, serde_json::Value> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    name.ok_or_else(|| err(&req.id, "not_found", "class not found", None))
}

/// Roster in sort order. Ranking relies on this order: equal totals keep
/// roster order through the stable sort.
pub(super) fn load_roster(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    class_name: &str,
) -> Result<Vec<RosterStudent>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, admission_no
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    stmt.query_map([class_id], |r| {
        let id: String = r.get(0)?;
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        let admission_no: String = r.get(3)?;
        Ok(RosterStudent {
            id,
            name: format!("{}, {}", last, first),
            admission_no,
            class_name: class_name.to_string(),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Load the entries the caller is allowed to aggregate over. The visibility
/// policy is applied here, in the query, so public collections can never see
/// an unfinalized row.
pub(super) fn load_visible_entries(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    assessment_types: &[&'static str],
    visibility: Visibility,
    entered_by: Option<&str>,
) -> Result<Vec<AssessmentEntry>, serde_json::Value> {
    let type_placeholders = std::iter::repeat("?")
        .take(assessment_types.len())
        .collect::<Vec<_>>()
        .join(",");
    let visibility_clause = match visibility {
        Visibility::OwnerView => "a.entered_by = ?",
        Visibility::PublicView => "a.finalized = 1",
    };
    let sql = format!(
        "SELECT a.student_id, a.subject, a.term, a.assessment_type,
                COALESCE(a.marks_obtained, 0)
         FROM assessments a
         JOIN students s ON s.id = a.student_id
         WHERE s.class_id = ? AND a.assessment_type IN ({}) AND {}",
        type_placeholders, visibility_clause
    );

    let mut bind_values: Vec<Value> = Vec::with_capacity(assessment_types.len() + 2);
    bind_values.push(Value::Text(class_id.to_string()));
    for t in assessment_types {
        bind_values.push(Value::Text((*t).to_string()));
    }
    if visibility == Visibility::OwnerView {
        // Validated present by parse_visibility.
        bind_values.push(Value::Text(entered_by.unwrap_or_default().to_string()));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    stmt.query_map(params_from_iter(bind_values), |r| {
        Ok(AssessmentEntry {
            student_id: r.get(0)?,
            subject: r.get(1)?,
            term: r.get(2)?,
            assessment_type: r.get(3)?,
            marks_obtained: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_collections_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
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
            Some(json!({ "assessmentType": assessment_type })),
        );
    };
    let (visibility, entered_by) = match parse_visibility(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = match class_name(conn, req, &class_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roster = match load_roster(conn, req, &class_id, &name) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entries = match load_visible_entries(
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
    ok(
        &req.id,
        json!({
            "className": name,
            "term": term,
            "assessmentType": assessment_type,
            "collections": rows
        }),
    )
}

fn handle_collections_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_types) = req.params.get("assessmentTypes").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing assessmentTypes", None);
    };
    let mut types: Vec<&'static str> = Vec::new();
    for raw in raw_types {
        let Some(t) = raw.as_str().and_then(normalize_assessment_type) else {
            return err(
                &req.id,
                "bad_params",
                "assessmentTypes must contain only: Open-Term, Mid-Term, End-Term",
                Some(json!({ "assessmentType": raw })),
            );
        };
        if !types.contains(&t) {
            types.push(t);
        }
    }
    if types.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "assessmentTypes must not be empty",
            None,
        );
    }
    let (visibility, entered_by) = match parse_visibility(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = match class_name(conn, req, &class_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roster = match load_roster(conn, req, &class_id, &name) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entries = match load_visible_entries(
        conn,
        req,
        &class_id,
        &types,
        visibility,
        entered_by.as_deref(),
    ) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let owned_types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    let rows = generate_average_collection_rows(&entries, &roster, &name, &owned_types);
    ok(
        &req.id,
        json!({
            "className": name,
            "assessmentTypes": owned_types,
            "collections": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "collections.generate" => Some(handle_collections_generate(state, req)),
        "collections.average" => Some(handle_collections_average(state, req)),
        _ => None,
    }
}
