use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

use crate::catalog::{parse_instant, OpError};
use crate::lifecycle::{self, Status};

pub const USER_COLS: &str =
    "id, name, email, role, avatar_url, grade_level, student_no, enrollment_date, login_streak, subject";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub avatar_url: String,
    pub grade_level: Option<i64>,
    pub student_no: Option<String>,
    pub enrollment_date: Option<String>,
    pub login_streak: Option<i64>,
    pub subject: Option<String>,
}

pub fn read_user_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        avatar_url: row.get(4)?,
        grade_level: row.get(5)?,
        student_no: row.get(6)?,
        enrollment_date: row.get(7)?,
        login_streak: row.get(8)?,
        subject: row.get(9)?,
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, OpError> {
    conn.query_row(
        &format!("SELECT {USER_COLS} FROM users WHERE id = ?"),
        [user_id],
        read_user_row,
    )
    .optional()
    .map_err(|e| OpError::db("db_query_failed", e))
}

fn achievements_json(conn: &Connection, user_id: &str) -> Result<Vec<serde_json::Value>, OpError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, icon FROM achievements
             WHERE user_id = ? ORDER BY rowid",
        )
        .map_err(|e| OpError::db("db_query_failed", e))?;
    stmt.query_map([user_id], |row| {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let description: String = row.get(2)?;
        let icon: String = row.get(3)?;
        Ok(json!({ "id": id, "name": name, "description": description, "icon": icon }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| OpError::db("db_query_failed", e))
}

/// Role-specific fields stay null for the roles they don't apply to;
/// passwords never leave the store.
pub fn user_json(conn: &Connection, u: &UserRow) -> Result<serde_json::Value, OpError> {
    let mut v = json!({
        "id": u.id,
        "name": u.name,
        "email": u.email,
        "role": u.role,
        "avatarUrl": u.avatar_url,
    });
    if u.role == "student" {
        v["grade"] = json!(u.grade_level);
        v["studentId"] = json!(u.student_no);
        v["enrollmentDate"] = json!(u.enrollment_date);
        v["loginStreak"] = json!(u.login_streak);
        v["achievements"] = json!(achievements_json(conn, &u.id)?);
    }
    if u.role == "teacher" {
        v["subject"] = json!(u.subject);
    }
    Ok(v)
}

pub const SA_COLS: &str = "id, master_assignment_id, student_id, title, subject, instructions, \
                           due_date, status, grade, feedback, submitted_at, is_exempt, exemption_reason";

#[derive(Debug, Clone)]
pub struct StudentAssignmentRow {
    pub id: String,
    pub master_assignment_id: String,
    pub student_id: String,
    pub title: String,
    pub subject: String,
    pub instructions: String,
    pub due_date: String,
    pub status: String,
    pub grade: Option<String>,
    pub feedback: Option<String>,
    pub submitted_at: Option<String>,
    pub is_exempt: bool,
    pub exemption_reason: Option<String>,
}

pub fn read_sa_row(row: &Row) -> rusqlite::Result<StudentAssignmentRow> {
    Ok(StudentAssignmentRow {
        id: row.get(0)?,
        master_assignment_id: row.get(1)?,
        student_id: row.get(2)?,
        title: row.get(3)?,
        subject: row.get(4)?,
        instructions: row.get(5)?,
        due_date: row.get(6)?,
        status: row.get(7)?,
        grade: row.get(8)?,
        feedback: row.get(9)?,
        submitted_at: row.get(10)?,
        is_exempt: row.get::<_, i64>(11)? != 0,
        exemption_reason: row.get(12)?,
    })
}

impl StudentAssignmentRow {
    pub fn stored_status(&self) -> Result<Status, OpError> {
        Status::parse(&self.status).ok_or_else(|| OpError {
            code: "db_query_failed",
            message: format!("unrecognized stored status: {}", self.status),
            details: None,
        })
    }

    pub fn due_instant(&self) -> Result<DateTime<Utc>, OpError> {
        parse_instant(&self.due_date)
            .ok_or_else(|| OpError::validation("stored dueDate is not RFC 3339"))
    }
}

/// Serializes a record with its derived display status; the stored
/// status is exposed separately so clients can see both.
pub fn student_assignment_json(
    sa: &StudentAssignmentRow,
    now: DateTime<Utc>,
) -> Result<serde_json::Value, OpError> {
    let status = sa.stored_status()?;
    let due = sa.due_instant()?;
    Ok(json!({
        "id": sa.id,
        "masterAssignmentId": sa.master_assignment_id,
        "studentId": sa.student_id,
        "title": sa.title,
        "subject": sa.subject,
        "instructions": sa.instructions,
        "dueDate": sa.due_date,
        "status": lifecycle::display_status(status, sa.is_exempt, due, now),
        "storedStatus": sa.status,
        "grade": sa.grade,
        "feedback": sa.feedback,
        "submittedAt": sa.submitted_at,
        "isExempt": sa.is_exempt,
        "exemptionReason": sa.exemption_reason,
    }))
}

pub fn get_student_assignment(
    conn: &Connection,
    id: &str,
) -> Result<Option<StudentAssignmentRow>, OpError> {
    conn.query_row(
        &format!("SELECT {SA_COLS} FROM student_assignments WHERE id = ?"),
        [id],
        read_sa_row,
    )
    .optional()
    .map_err(|e| OpError::db("db_query_failed", e))
}

/// Optional `now` override on read/submit paths; tests pin overdue
/// behavior with it, real clients omit it.
pub fn now_param(params: &serde_json::Value) -> Result<DateTime<Utc>, OpError> {
    match params.get("now").and_then(|v| v.as_str()) {
        Some(s) => {
            parse_instant(s).ok_or_else(|| OpError::validation("now must be an RFC 3339 instant"))
        }
        None => Ok(Utc::now()),
    }
}

pub fn forum_post_json(conn: &Connection, post_id: &str) -> Result<serde_json::Value, OpError> {
    let post = conn
        .query_row(
            "SELECT id, author_id, author_name, author_avatar_url, title, content, tags, created_at
             FROM forum_posts WHERE id = ?",
            [post_id],
            |row| {
                let tags_raw: String = row.get(6)?;
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "author": {
                        "id": row.get::<_, String>(1)?,
                        "name": row.get::<_, String>(2)?,
                        "avatarUrl": row.get::<_, String>(3)?,
                    },
                    "title": row.get::<_, String>(4)?,
                    "content": row.get::<_, String>(5)?,
                    "tags": serde_json::from_str::<serde_json::Value>(&tags_raw)
                        .unwrap_or_else(|_| json!([])),
                    "timestamp": row.get::<_, String>(7)?,
                }))
            },
        )
        .optional()
        .map_err(|e| OpError::db("db_query_failed", e))?;

    let Some(mut post) = post else {
        return Err(OpError::not_found("forum post not found"));
    };

    // Detail-view order: most upvoted replies first, then oldest.
    let mut stmt = conn
        .prepare(
            "SELECT id, author_id, author_name, author_avatar_url, content, upvotes, created_at
             FROM forum_replies WHERE post_id = ?
             ORDER BY upvotes DESC, rowid",
        )
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let replies = stmt
        .query_map([post_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "author": {
                    "id": row.get::<_, String>(1)?,
                    "name": row.get::<_, String>(2)?,
                    "avatarUrl": row.get::<_, String>(3)?,
                },
                "content": row.get::<_, String>(4)?,
                "upvotes": row.get::<_, i64>(5)?,
                "timestamp": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;

    post["replies"] = json!(replies);
    Ok(post)
}

pub fn conversation_json(
    conn: &Connection,
    conversation_id: &str,
    student_id: &str,
    teacher_id: &str,
) -> Result<serde_json::Value, OpError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, sender_id, body, sent_at, is_read FROM messages
             WHERE conversation_id = ? ORDER BY rowid",
        )
        .map_err(|e| OpError::db("db_query_failed", e))?;
    let messages = stmt
        .query_map([conversation_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "senderId": row.get::<_, String>(1)?,
                "text": row.get::<_, String>(2)?,
                "timestamp": row.get::<_, String>(3)?,
                "isRead": row.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| OpError::db("db_query_failed", e))?;

    Ok(json!({
        "id": conversation_id,
        "studentId": student_id,
        "teacherId": teacher_id,
        "messages": messages,
    }))
}
