use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::lifecycle::Status;

/// Error carried out of store operations; handlers turn it into the
/// wire error object. `code` is one of the domain codes (`not_found`,
/// `validation`, `duplicate`, `invalid_transition`) or a `db_*` code.
#[derive(Debug, Clone)]
pub struct OpError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl OpError {
    pub fn validation(message: impl Into<String>) -> Self {
        OpError {
            code: "validation",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        OpError {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        OpError {
            code: "duplicate",
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        OpError {
            code: "invalid_transition",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(context: &'static str, e: rusqlite::Error) -> Self {
        OpError {
            code: context,
            message: e.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Template for a teacher-authored assignment, minus the id.
#[derive(Debug, Clone)]
pub struct MasterTemplate {
    pub teacher_id: String,
    pub title: String,
    pub subject: String,
    pub instructions: String,
    pub due_date: String,
    pub assigned_student_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedMaster {
    pub id: String,
    pub fanned_out: usize,
}

/// Deterministic per-pair record id; together with the
/// UNIQUE(master, student) constraint it guarantees at most one
/// materialized record per (master, student).
pub fn student_assignment_id(master_id: &str, student_id: &str) -> String {
    format!("sa-{}-{}", master_id, student_id)
}

fn user_role(conn: &Connection, user_id: &str) -> Result<Option<String>, OpError> {
    conn.query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
        r.get::<_, String>(0)
    })
    .optional()
    .map_err(|e| OpError::db("db_query_failed", e))
}

/// Persists the master assignment and materializes one per-student
/// record per target, all inside a single transaction: either every
/// target id resolves to a student and every record lands, or nothing
/// does.
pub fn create_master_assignment(
    conn: &Connection,
    tmpl: &MasterTemplate,
    now: DateTime<Utc>,
) -> Result<CreatedMaster, OpError> {
    if tmpl.title.trim().is_empty() {
        return Err(OpError::validation("title must not be empty"));
    }
    if tmpl.instructions.trim().is_empty() {
        return Err(OpError::validation("instructions must not be empty"));
    }
    if tmpl.subject.trim().is_empty() {
        return Err(OpError::validation("subject must not be empty"));
    }
    // Past due dates are legal (the assignment is simply overdue on
    // arrival); only the format is validated.
    let due = match parse_instant(&tmpl.due_date) {
        Some(d) => d,
        None => {
            return Err(OpError::validation("dueDate must be an RFC 3339 instant")
                .with_details(json!({ "dueDate": tmpl.due_date })))
        }
    };
    // Stored normalized to UTC in the Z form so lexicographic ORDER BY
    // over due_date is chronological regardless of the caller's offset.
    let due_date = due.to_rfc3339_opts(SecondsFormat::Secs, true);
    if tmpl.assigned_student_ids.is_empty() {
        return Err(OpError::validation("assignedStudentIds must not be empty"));
    }
    for (i, id) in tmpl.assigned_student_ids.iter().enumerate() {
        if tmpl.assigned_student_ids[..i].contains(id) {
            return Err(OpError::validation("assignedStudentIds contains a duplicate")
                .with_details(json!({ "studentId": id })));
        }
    }

    match user_role(conn, &tmpl.teacher_id)?.as_deref() {
        Some("teacher") => {}
        Some(_) => {
            return Err(OpError::validation("teacherId does not refer to a teacher")
                .with_details(json!({ "teacherId": tmpl.teacher_id })))
        }
        None => {
            return Err(OpError::not_found("teacher not found")
                .with_details(json!({ "teacherId": tmpl.teacher_id })))
        }
    }

    // Resolve every target before touching any table, so a bad id
    // never produces a partial fan-out.
    for student_id in &tmpl.assigned_student_ids {
        match user_role(conn, student_id)?.as_deref() {
            Some("student") => {}
            _ => {
                return Err(OpError::validation(
                    "assignedStudentIds must all refer to existing students",
                )
                .with_details(json!({ "studentId": student_id })))
            }
        }
    }

    let master_id = uuid::Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| OpError::db("db_tx_failed", e))?;

    if let Err(e) = tx.execute(
        "INSERT INTO master_assignments(id, teacher_id, title, subject, instructions, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &master_id,
            &tmpl.teacher_id,
            tmpl.title.trim(),
            tmpl.subject.trim(),
            &tmpl.instructions,
            &due_date,
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ) {
        let _ = tx.rollback();
        return Err(OpError::db("db_insert_failed", e));
    }

    for (i, student_id) in tmpl.assigned_student_ids.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO assignment_targets(master_assignment_id, student_id, sort_order)
             VALUES(?, ?, ?)",
            (&master_id, student_id, i as i64),
        ) {
            let _ = tx.rollback();
            return Err(OpError::db("db_insert_failed", e));
        }

        // Snapshot copies, deliberately: later template edits (if ever
        // supported) must not retroactively change materialized records.
        let record_id = student_assignment_id(&master_id, student_id);
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO student_assignments(
                id, master_assignment_id, student_id,
                title, subject, instructions, due_date,
                status, grade, feedback, submitted_at, is_exempt, exemption_reason)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, 0, NULL)",
            (
                &record_id,
                &master_id,
                student_id,
                tmpl.title.trim(),
                tmpl.subject.trim(),
                &tmpl.instructions,
                &due_date,
                Status::NotStarted.as_str(),
            ),
        );
        match inserted {
            Ok(1) => {}
            Ok(_) => {
                let _ = tx.rollback();
                return Err(OpError::duplicate(
                    "a record already exists for this (assignment, student) pair",
                )
                .with_details(json!({ "studentId": student_id })));
            }
            Err(e) => {
                let _ = tx.rollback();
                return Err(OpError::db("db_insert_failed", e));
            }
        }
    }

    tx.commit().map_err(|e| OpError::db("db_commit_failed", e))?;

    Ok(CreatedMaster {
        id: master_id,
        fanned_out: tmpl.assigned_student_ids.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store_with_people() -> Connection {
        let conn = db::open_store().expect("open store");
        for (id, role) in [
            ("t-1", "teacher"),
            ("s-1", "student"),
            ("s-2", "student"),
        ] {
            conn.execute(
                "INSERT INTO users(id, name, email, password, role, avatar_url, created_at)
                 VALUES(?, ?, ?, 'pw', ?, 'none', '2025-01-01T00:00:00Z')",
                (id, id, format!("{id}@school.edu"), role),
            )
            .expect("insert user");
        }
        conn
    }

    fn template(assigned: &[&str]) -> MasterTemplate {
        MasterTemplate {
            teacher_id: "t-1".into(),
            title: "Quiz".into(),
            subject: "Math".into(),
            instructions: "Answer all questions.".into(),
            due_date: "2025-06-01T00:00:00Z".into(),
            assigned_student_ids: assigned.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn record_ids_are_deterministic_per_pair() {
        assert_eq!(student_assignment_id("ma", "s"), "sa-ma-s");
    }

    #[test]
    fn fan_out_creates_targets_and_records() {
        let conn = store_with_people();
        let now = parse_instant("2025-05-01T00:00:00Z").unwrap();
        let created = create_master_assignment(&conn, &template(&["s-1", "s-2"]), now).unwrap();
        assert_eq!(created.fanned_out, 2);

        let records: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM student_assignments WHERE master_assignment_id = ?",
                [&created.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(records, 2);
    }

    #[test]
    fn validation_failures_leave_no_rows_behind() {
        let conn = store_with_people();
        let now = parse_instant("2025-05-01T00:00:00Z").unwrap();

        for tmpl in [
            template(&[]),
            template(&["s-1", "s-1"]),
            template(&["s-1", "missing"]),
            template(&["t-1"]),
        ] {
            let e = create_master_assignment(&conn, &tmpl, now).unwrap_err();
            assert_eq!(e.code, "validation");
        }

        let masters: i64 = conn
            .query_row("SELECT COUNT(*) FROM master_assignments", [], |r| r.get(0))
            .unwrap();
        let records: i64 = conn
            .query_row("SELECT COUNT(*) FROM student_assignments", [], |r| r.get(0))
            .unwrap();
        assert_eq!((masters, records), (0, 0));
    }

    #[test]
    fn due_dates_are_normalized_to_utc_on_write() {
        let conn = store_with_people();
        let now = parse_instant("2025-05-01T00:00:00Z").unwrap();
        let mut tmpl = template(&["s-1"]);
        tmpl.due_date = "2025-06-01T09:00:00+05:00".into();
        let created = create_master_assignment(&conn, &tmpl, now).unwrap();

        let (master_due, record_due): (String, String) = conn
            .query_row(
                "SELECT ma.due_date, sa.due_date FROM master_assignments ma
                 JOIN student_assignments sa ON sa.master_assignment_id = ma.id
                 WHERE ma.id = ?",
                [&created.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(master_due, "2025-06-01T04:00:00Z");
        assert_eq!(record_due, "2025-06-01T04:00:00Z");
    }

    #[test]
    fn unknown_teacher_is_not_found() {
        let conn = store_with_people();
        let now = parse_instant("2025-05-01T00:00:00Z").unwrap();
        let mut tmpl = template(&["s-1"]);
        tmpl.teacher_id = "t-missing".into();
        let e = create_master_assignment(&conn, &tmpl, now).unwrap_err();
        assert_eq!(e.code, "not_found");
    }
}
