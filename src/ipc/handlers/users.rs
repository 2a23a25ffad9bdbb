use crate::catalog::OpError;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{get_user, read_user_row, user_json, UserRow, USER_COLS};
use crate::ipc::types::{AppState, Request};
use crate::views;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 3] = ["student", "teacher", "admin"];

fn email_taken(conn: &Connection, email: &str, except_id: Option<&str>) -> Result<bool, OpError> {
    let hit: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ? AND id != ? LIMIT 1",
            (email, except_id.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| OpError::db("db_query_failed", e))?;
    Ok(hit.is_some())
}

fn list_users(
    conn: &Connection,
    role: Option<&str>,
    query: &str,
) -> Result<Vec<UserRow>, OpError> {
    // Creation order is the stable underlying order every view builds on.
    let (sql, role_filter) = match role {
        Some(r) if r != "all" => (
            format!("SELECT {USER_COLS} FROM users WHERE role = ? ORDER BY rowid"),
            Some(r.to_string()),
        ),
        _ => (
            format!("SELECT {USER_COLS} FROM users ORDER BY rowid"),
            None,
        ),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let rows = match role_filter {
        Some(r) => stmt
            .query_map([&r], read_user_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], read_user_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| OpError::db("db_query_failed", e))?;

    Ok(rows
        .into_iter()
        .filter(|u| views::matches_search(&u.name, &u.email, query))
        .collect())
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let role = req.params.get("role").and_then(|v| v.as_str());
    if let Some(r) = role {
        if r != "all" && !ROLES.contains(&r) {
            return err(&req.id, "bad_params", "unknown role filter", Some(json!({ "role": r })));
        }
    }
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let page = req.params.get("page").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let page_size = req
        .params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(views::DEFAULT_PAGE_SIZE as u64) as usize;

    let rows = match list_users(conn, role, query) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let total = rows.len();
    let slice = views::page_slice(&rows, page_size, page);
    let mut users = Vec::with_capacity(slice.len());
    for row in slice {
        match user_json(conn, row) {
            Ok(v) => users.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(
        &req.id,
        json!({
            "users": users,
            "total": total,
            "page": page,
            "pageSize": page_size,
            "pageCount": views::page_count(total, page_size)
        }),
    )
}

/// The student-roster view: student-only, searched, paginated. The
/// page-reset-on-search rule lives in the client; the server just makes
/// (query, page) deterministic and reports the page count.
fn handle_roster_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let page = req.params.get("page").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let page_size = req
        .params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(views::DEFAULT_PAGE_SIZE as u64) as usize;

    let rows = match list_users(conn, Some("student"), query) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };
    let total = rows.len();
    let slice = views::page_slice(&rows, page_size, page);

    let mut students = Vec::with_capacity(slice.len());
    for row in slice {
        match user_json(conn, row) {
            Ok(v) => students.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(
        &req.id,
        json!({
            "students": students,
            "total": total,
            "page": page,
            "pageSize": page_size,
            "pageCount": views::page_count(total, page_size)
        }),
    )
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "validation", "name must not be empty", None),
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "validation", "email must not be empty", None),
    };
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        Some(v) if ROLES.contains(&v) => v.to_string(),
        Some(v) => {
            return err(&req.id, "validation", "unknown role", Some(json!({ "role": v })))
        }
        None => return err(&req.id, "validation", "missing role", None),
    };

    match email_taken(conn, &email, None) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                "email already exists",
                Some(json!({ "email": email })),
            )
        }
        Ok(false) => {}
        Err(e) => return op_err(&req.id, e),
    }

    let user_id = format!("user-{}", Uuid::new_v4());
    // Admin-created users get a default password; real credential
    // handling is out of scope for the mock store.
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("password")
        .to_string();
    let avatar_url = req
        .params
        .get("avatarUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("https://i.pravatar.cc/150?u={}", user_id));
    let grade_level = req.params.get("grade").and_then(|v| v.as_i64());
    let student_no = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let enrollment_date = req
        .params
        .get("enrollmentDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let login_streak = req.params.get("loginStreak").and_then(|v| v.as_i64());
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO users(id, name, email, password, role, avatar_url,
                           grade_level, student_no, enrollment_date, login_streak, subject, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &name,
            &email,
            &password,
            &role,
            &avatar_url,
            grade_level,
            &student_no,
            &enrollment_date,
            login_streak,
            &subject,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    match get_user(conn, &user_id) {
        Ok(Some(row)) => match user_json(conn, &row) {
            Ok(v) => ok(&req.id, json!({ "user": v })),
            Err(e) => op_err(&req.id, e),
        },
        Ok(None) => err(&req.id, "db_query_failed", "created user vanished", None),
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let existing = match get_user(conn, &user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return op_err(&req.id, e),
    };

    // Role changes mean a new identity in this model, never a mutation.
    if let Some(role) = patch.get("role").and_then(|v| v.as_str()) {
        if role != existing.role {
            return err(
                &req.id,
                "validation",
                "role is immutable; create a new user instead",
                Some(json!({ "role": existing.role })),
            );
        }
    }

    if let Some(email) = patch.get("email").and_then(|v| v.as_str()) {
        if email.trim().is_empty() {
            return err(&req.id, "validation", "email must not be empty", None);
        }
        match email_taken(conn, email.trim(), Some(&user_id)) {
            Ok(true) => {
                return err(
                    &req.id,
                    "duplicate",
                    "email already exists",
                    Some(json!({ "email": email })),
                )
            }
            Ok(false) => {}
            Err(e) => return op_err(&req.id, e),
        }
    }
    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        if name.trim().is_empty() {
            return err(&req.id, "validation", "name must not be empty", None);
        }
    }

    // The whole patch lands or none of it does.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let fields: [(&str, &str); 8] = [
        ("name", "name"),
        ("email", "email"),
        ("password", "password"),
        ("avatarUrl", "avatar_url"),
        ("studentId", "student_no"),
        ("enrollmentDate", "enrollment_date"),
        ("subject", "subject"),
        ("role", "role"), // validated above; writing the same value is a no-op
    ];
    for (key, column) in fields {
        if let Some(value) = patch.get(key).and_then(|v| v.as_str()) {
            if let Err(e) = tx.execute(
                &format!("UPDATE users SET {column} = ? WHERE id = ?"),
                (value.trim(), &user_id),
            ) {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    for (key, column) in [("grade", "grade_level"), ("loginStreak", "login_streak")] {
        if let Some(value) = patch.get(key).and_then(|v| v.as_i64()) {
            if let Err(e) = tx.execute(
                &format!("UPDATE users SET {column} = ? WHERE id = ?"),
                (value, &user_id),
            ) {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match get_user(conn, &user_id) {
        Ok(Some(row)) => match user_json(conn, &row) {
            Ok(v) => ok(&req.id, json!({ "user": v })),
            Err(e) => op_err(&req.id, e),
        },
        Ok(None) => err(&req.id, "db_query_failed", "updated user vanished", None),
        Err(e) => op_err(&req.id, e),
    }
}

/// Removes the user and every assignment-catalog and lifecycle
/// reference in one transaction, in dependency order, so no dangling
/// ids remain. Forum content is untouched: it carries author snapshots.
fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let existing = match get_user(conn, &user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return op_err(&req.id, e),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let steps: Vec<(&str, String)> = match existing.role.as_str() {
        "teacher" => vec![
            (
                "student_assignments",
                "DELETE FROM student_assignments
                 WHERE master_assignment_id IN
                   (SELECT id FROM master_assignments WHERE teacher_id = ?)"
                    .to_string(),
            ),
            (
                "assignment_targets",
                "DELETE FROM assignment_targets
                 WHERE master_assignment_id IN
                   (SELECT id FROM master_assignments WHERE teacher_id = ?)"
                    .to_string(),
            ),
            (
                "master_assignments",
                "DELETE FROM master_assignments WHERE teacher_id = ?".to_string(),
            ),
            (
                "messages",
                "DELETE FROM messages WHERE conversation_id IN
                   (SELECT id FROM conversations WHERE teacher_id = ?)"
                    .to_string(),
            ),
            (
                "conversations",
                "DELETE FROM conversations WHERE teacher_id = ?".to_string(),
            ),
        ],
        "student" => vec![
            (
                "student_assignments",
                "DELETE FROM student_assignments WHERE student_id = ?".to_string(),
            ),
            (
                "assignment_targets",
                "DELETE FROM assignment_targets WHERE student_id = ?".to_string(),
            ),
            (
                "messages",
                "DELETE FROM messages WHERE conversation_id IN
                   (SELECT id FROM conversations WHERE student_id = ?)"
                    .to_string(),
            ),
            (
                "conversations",
                "DELETE FROM conversations WHERE student_id = ?".to_string(),
            ),
        ],
        _ => Vec::new(),
    };

    for (table, sql) in steps {
        if let Err(e) = tx.execute(&sql, [&user_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM achievements WHERE user_id = ?", [&user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "achievements" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "roster.search" => Some(handle_roster_search(state, req)),
        _ => None,
    }
}
