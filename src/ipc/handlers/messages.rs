use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{conversation_json, get_user};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_conversations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match get_user(conn, &user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return op_err(&req.id, e),
    }

    let column = match role.as_str() {
        "student" => "student_id",
        "teacher" => "teacher_id",
        other => {
            return err(&req.id, "bad_params", "unknown role", Some(json!({ "role": other })))
        }
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT id, student_id, teacher_id FROM conversations WHERE {column} = ? ORDER BY rowid"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut conversations = Vec::new();
    for (id, student, teacher) in &rows {
        match conversation_json(conn, id, student, teacher) {
            Ok(v) => conversations.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(&req.id, json!({ "conversations": conversations }))
}

/// First message between a (student, teacher) pair creates the
/// conversation; later messages append to it.
fn handle_messages_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let sender_id = match req.params.get("senderId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing senderId", None),
    };
    let body = match req.params.get("body").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "validation", "body must not be empty", None),
    };

    if sender_id != student_id && sender_id != teacher_id {
        return err(
            &req.id,
            "validation",
            "sender must be a conversation participant",
            None,
        );
    }

    let student = match get_user(conn, &student_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return op_err(&req.id, e),
    };
    let teacher = match get_user(conn, &teacher_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return op_err(&req.id, e),
    };
    if student.role != "student" {
        return err(&req.id, "validation", "studentId must name a student", None);
    }
    if teacher.role != "teacher" {
        return err(&req.id, "validation", "teacherId must name a teacher", None);
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM conversations WHERE student_id = ? AND teacher_id = ?",
            (&student_id, &teacher_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let conversation_id = match existing {
        Some(id) => id,
        None => {
            let id = format!("conv-{}", Uuid::new_v4());
            if let Err(e) = conn.execute(
                "INSERT INTO conversations(id, student_id, teacher_id) VALUES(?, ?, ?)",
                (&id, &student_id, &teacher_id),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "conversations" })),
                );
            }
            id
        }
    };

    let message_id = format!("msg-{}", Uuid::new_v4());
    if let Err(e) = conn.execute(
        "INSERT INTO messages(id, conversation_id, sender_id, body, sent_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &message_id,
            &conversation_id,
            &sender_id,
            &body,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "messages" })),
        );
    }

    match conversation_json(conn, &conversation_id, &student_id, &teacher_id) {
        Ok(v) => ok(&req.id, json!({ "conversation": v })),
        Err(e) => op_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "conversations.list" => Some(handle_conversations_list(state, req)),
        "messages.send" => Some(handle_messages_send(state, req)),
        _ => None,
    }
}
