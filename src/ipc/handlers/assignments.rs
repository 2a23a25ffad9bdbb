use crate::catalog::{self, MasterTemplate, OpError};
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{
    get_student_assignment, now_param, read_sa_row, student_assignment_json, StudentAssignmentRow,
    SA_COLS,
};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{self, Status};
use crate::views;
use chrono::SecondsFormat;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn require_record(conn: &Connection, id: &str) -> Result<StudentAssignmentRow, OpError> {
    get_student_assignment(conn, id)?
        .ok_or_else(|| OpError::not_found("assignment not found").with_details(json!({ "id": id })))
}

fn handle_create_master(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subject", None),
    };
    let instructions = match req.params.get("instructions").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing instructions", None),
    };
    let due_date = match req.params.get("dueDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing dueDate", None),
    };
    let assigned: Vec<String> = match req.params.get("assignedStudentIds").and_then(|v| v.as_array())
    {
        Some(arr) => {
            let mut ids = Vec::with_capacity(arr.len());
            for v in arr {
                match v.as_str() {
                    Some(s) => ids.push(s.to_string()),
                    None => {
                        return err(
                            &req.id,
                            "bad_params",
                            "assignedStudentIds must be an array of strings",
                            None,
                        )
                    }
                }
            }
            ids
        }
        None => return err(&req.id, "bad_params", "missing assignedStudentIds", None),
    };

    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    let tmpl = MasterTemplate {
        teacher_id,
        title,
        subject,
        instructions,
        due_date,
        assigned_student_ids: assigned,
    };
    match catalog::create_master_assignment(conn, &tmpl, now) {
        Ok(created) => ok(
            &req.id,
            json!({
                "masterAssignmentId": created.id,
                "assignedStudentCount": created.fanned_out
            }),
        ),
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_list_master(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT
           ma.id, ma.teacher_id, ma.title, ma.subject, ma.instructions, ma.due_date,
           (SELECT COUNT(*) FROM assignment_targets t WHERE t.master_assignment_id = ma.id)
         FROM master_assignments ma
         WHERE ma.teacher_id = ?
         ORDER BY ma.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&teacher_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "teacherId": row.get::<_, String>(1)?,
                "title": row.get::<_, String>(2)?,
                "subject": row.get::<_, String>(3)?,
                "instructions": row.get::<_, String>(4)?,
                "dueDate": row.get::<_, String>(5)?,
                "assignedStudentCount": row.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(masters) => ok(&req.id, json!({ "masterAssignments": masters })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Per-student records of one master, in fan-out (insertion) order,
/// paginated for the expandable teacher view.
fn handle_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let master_id = match req.params.get("masterAssignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing masterAssignmentId", None),
    };
    let page = req.params.get("page").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let page_size = req
        .params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(views::DEFAULT_PAGE_SIZE as u64) as usize;
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    let exists: Result<Option<i64>, _> = conn
        .query_row(
            "SELECT 1 FROM master_assignments WHERE id = ?",
            [&master_id],
            |r| r.get(0),
        )
        .optional();
    match exists {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "master assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Both tables carry master_assignment_id and student_id, so every
    // column must be qualified.
    let mut stmt = match conn.prepare(
        "SELECT sa.id, sa.master_assignment_id, sa.student_id, sa.title, sa.subject,
                sa.instructions, sa.due_date, sa.status, sa.grade, sa.feedback,
                sa.submitted_at, sa.is_exempt, sa.exemption_reason
         FROM student_assignments sa
         JOIN assignment_targets t
           ON t.master_assignment_id = sa.master_assignment_id
          AND t.student_id = sa.student_id
         WHERE sa.master_assignment_id = ?
         ORDER BY t.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&master_id], read_sa_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total = rows.len();
    let slice = views::page_slice(&rows, page_size, page);
    let mut records = Vec::with_capacity(slice.len());
    for sa in slice {
        match student_assignment_json(sa, now) {
            Ok(v) => records.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(
        &req.id,
        json!({
            "studentAssignments": records,
            "total": total,
            "page": page,
            "pageSize": page_size,
            "pageCount": views::page_count(total, page_size)
        }),
    )
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {SA_COLS} FROM student_assignments WHERE student_id = ? ORDER BY rowid"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&student_id], read_sa_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut records = Vec::with_capacity(rows.len());
    for sa in &rows {
        match student_assignment_json(sa, now) {
            Ok(v) => records.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(&req.id, json!({ "studentAssignments": records }))
}

fn transition_err(id: &str, e: lifecycle::TransitionError) -> serde_json::Value {
    err(id, "invalid_transition", e.message(), None)
}

fn respond_with_record(
    req: &Request,
    conn: &Connection,
    record_id: &str,
) -> serde_json::Value {
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    match require_record(conn, record_id) {
        Ok(sa) => match student_assignment_json(&sa, now) {
            Ok(v) => ok(&req.id, json!({ "studentAssignment": v })),
            Err(e) => op_err(&req.id, e),
        },
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let record_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };

    let sa = match require_record(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let status = match sa.stored_status() {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    if let Err(e) = lifecycle::check_start(status, sa.is_exempt) {
        return transition_err(&req.id, e);
    }

    if let Err(e) = conn.execute(
        "UPDATE student_assignments SET status = ? WHERE id = ?",
        (Status::InProgress.as_str(), &record_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    respond_with_record(req, conn, &record_id)
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let record_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    let sa = match require_record(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let status = match sa.stored_status() {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    if let Err(e) = lifecycle::check_submit(status, sa.is_exempt) {
        return transition_err(&req.id, e);
    }

    // Stored in the Z form like every other instant in the store.
    if let Err(e) = conn.execute(
        "UPDATE student_assignments SET status = ?, submitted_at = ? WHERE id = ?",
        (
            Status::Submitted.as_str(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            &record_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    respond_with_record(req, conn, &record_id)
}

fn handle_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let record_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };
    let grade = match req.params.get("grade").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        Some(_) => return err(&req.id, "validation", "grade must not be empty", None),
        None => return err(&req.id, "validation", "missing grade", None),
    };
    // Feedback stays optional and nullable.
    let feedback = req
        .params
        .get("feedback")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sa = match require_record(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let status = match sa.stored_status() {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    if let Err(e) = lifecycle::check_grade(status, sa.is_exempt) {
        return transition_err(&req.id, e);
    }

    if let Err(e) = conn.execute(
        "UPDATE student_assignments SET status = ?, grade = ?, feedback = ? WHERE id = ?",
        (Status::Graded.as_str(), &grade, &feedback, &record_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    respond_with_record(req, conn, &record_id)
}

fn handle_exempt(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let record_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };
    let reason = match req.params.get("reason").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        Some(_) => return err(&req.id, "validation", "reason must not be empty", None),
        None => return err(&req.id, "validation", "missing reason", None),
    };

    let sa = match require_record(conn, &record_id) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let status = match sa.stored_status() {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    if let Err(e) = lifecycle::check_exempt(status, sa.is_exempt) {
        return transition_err(&req.id, e);
    }

    // The stored status is retained untouched; exemption is a flag.
    if let Err(e) = conn.execute(
        "UPDATE student_assignments SET is_exempt = 1, exemption_reason = ? WHERE id = ?",
        (&reason, &record_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    respond_with_record(req, conn, &record_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.createMaster" => Some(handle_create_master(state, req)),
        "assignments.listMaster" => Some(handle_list_master(state, req)),
        "assignments.roster" => Some(handle_roster(state, req)),
        "assignments.listForStudent" => Some(handle_list_for_student(state, req)),
        "assignments.start" => Some(handle_start(state, req)),
        "assignments.submit" => Some(handle_submit(state, req)),
        "assignments.grade" => Some(handle_grade(state, req)),
        "assignments.exempt" => Some(handle_exempt(state, req)),
        _ => None,
    }
}
