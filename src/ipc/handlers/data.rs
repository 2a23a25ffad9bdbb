use crate::catalog::OpError;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{
    self, get_user, now_param, read_sa_row, read_user_row, student_assignment_json, user_json,
    SA_COLS, USER_COLS,
};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

fn users_by_role(conn: &Connection, role: &str) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {USER_COLS} FROM users WHERE role = ? ORDER BY rowid"
        ))
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([role], read_user_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;
    rows.iter().map(|u| user_json(conn, u)).collect()
}

fn all_users(conn: &Connection) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY rowid"))
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([], read_user_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;
    rows.iter().map(|u| user_json(conn, u)).collect()
}

fn student_assignments_where(
    conn: &Connection,
    sql: &str,
    param: &str,
    now: DateTime<Utc>,
) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([param], read_sa_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;
    rows.iter().map(|sa| student_assignment_json(sa, now)).collect()
}

fn master_assignments_for(
    conn: &Connection,
    teacher_id: &str,
) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare(
            "SELECT
               ma.id, ma.teacher_id, ma.title, ma.subject, ma.instructions, ma.due_date,
               (SELECT COUNT(*) FROM assignment_targets t WHERE t.master_assignment_id = ma.id)
             FROM master_assignments ma
             WHERE ma.teacher_id = ?
             ORDER BY ma.rowid",
        )
        .map_err(|e| OpError::db("db_query_failed", e))?;
    stmt.query_map([teacher_id], |row| {
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
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| OpError::db("db_query_failed", e))
}

fn forum_posts_json(conn: &Connection) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare("SELECT id FROM forum_posts ORDER BY rowid")
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;
    ids.iter()
        .map(|id| helpers::forum_post_json(conn, id))
        .collect()
}

fn conversations_for(
    conn: &Connection,
    user_id: &str,
    role: &str,
) -> Result<Vec<serde_json::Value>, OpError> {
    let column = if role == "teacher" { "teacher_id" } else { "student_id" };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, student_id, teacher_id FROM conversations WHERE {column} = ? ORDER BY rowid"
        ))
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;
    rows.iter()
        .map(|(id, student, teacher)| helpers::conversation_json(conn, id, student, teacher))
        .collect()
}

/// Role-scoped bundle: everything one dashboard load needs, shaped per
/// role the way the portal client consumes it.
fn handle_data_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing role", None),
    };
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    let user = match get_user(conn, &user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return op_err(&req.id, e),
    };

    let mut bundle = json!({
        "user": match user_json(conn, &user) {
            Ok(v) => v,
            Err(e) => return op_err(&req.id, e),
        },
        "users": [],
        "students": [],
        "teachers": [],
        "studentAssignments": [],
        "masterAssignments": [],
    });

    match role.as_str() {
        "admin" => {
            bundle["users"] = match all_users(conn) {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
        }
        "teacher" => {
            bundle["students"] = match users_by_role(conn, "student") {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
            bundle["masterAssignments"] = match master_assignments_for(conn, &user_id) {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
            bundle["studentAssignments"] = match student_assignments_where(
                conn,
                &format!(
                    "SELECT {SA_COLS} FROM student_assignments
                     WHERE master_assignment_id IN
                       (SELECT id FROM master_assignments WHERE teacher_id = ?)
                     ORDER BY rowid"
                ),
                &user_id,
                now,
            ) {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
        }
        "student" => {
            bundle["studentAssignments"] = match student_assignments_where(
                conn,
                &format!(
                    "SELECT {SA_COLS} FROM student_assignments WHERE student_id = ? ORDER BY rowid"
                ),
                &user_id,
                now,
            ) {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
            bundle["teachers"] = match users_by_role(conn, "teacher") {
                Ok(v) => json!(v),
                Err(e) => return op_err(&req.id, e),
            };
        }
        other => {
            return err(&req.id, "bad_params", "unknown role", Some(json!({ "role": other })))
        }
    }

    bundle["forumPosts"] = match forum_posts_json(conn) {
        Ok(v) => json!(v),
        Err(e) => return op_err(&req.id, e),
    };
    bundle["conversations"] = match conversations_for(conn, &user_id, &role) {
        Ok(v) => json!(v),
        Err(e) => return op_err(&req.id, e),
    };

    ok(&req.id, bundle)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "data.get" => Some(handle_data_get(state, req)),
        _ => None,
    }
}
