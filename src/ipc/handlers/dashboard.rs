use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{
    get_user, now_param, read_sa_row, student_assignment_json, SA_COLS,
};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle;
use serde_json::json;

const UPCOMING_DEFAULT_LIMIT: usize = 3;

/// Unfinished, non-exempt records still due in the future, soonest
/// first, truncated for the dashboard card.
fn handle_upcoming(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(UPCOMING_DEFAULT_LIMIT as u64) as usize;
    let now = match now_param(&req.params) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, e),
    };

    match get_user(conn, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return op_err(&req.id, e),
    }

    // Due dates are stored normalized to the UTC Z form, so
    // lexicographic ORDER BY is chronological.
    let mut stmt = match conn.prepare(&format!(
        "SELECT {SA_COLS} FROM student_assignments
         WHERE student_id = ? ORDER BY due_date, rowid"
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

    let mut upcoming = Vec::new();
    for sa in &rows {
        let status = match sa.stored_status() {
            Ok(v) => v,
            Err(e) => return op_err(&req.id, e),
        };
        let due = match sa.due_instant() {
            Ok(v) => v,
            Err(e) => return op_err(&req.id, e),
        };
        if !lifecycle::counts_as_upcoming(status, sa.is_exempt, due, now) {
            continue;
        }
        if upcoming.len() < limit {
            match student_assignment_json(sa, now) {
                Ok(v) => upcoming.push(v),
                Err(e) => return op_err(&req.id, e),
            }
        }
    }

    ok(&req.id, json!({ "assignments": upcoming }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
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

    match user.role.as_str() {
        "student" => {
            let achievement_count: i64 = match conn.query_row(
                "SELECT COUNT(*) FROM achievements WHERE user_id = ?",
                [&user_id],
                |r| r.get(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };

            let mut stmt = match conn.prepare(&format!(
                "SELECT {SA_COLS} FROM student_assignments WHERE student_id = ?"
            )) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let rows = match stmt
                .query_map([&user_id], read_sa_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let mut due_soon = 0usize;
            for sa in &rows {
                let status = match sa.stored_status() {
                    Ok(v) => v,
                    Err(e) => return op_err(&req.id, e),
                };
                let due = match sa.due_instant() {
                    Ok(v) => v,
                    Err(e) => return op_err(&req.id, e),
                };
                if lifecycle::counts_as_upcoming(status, sa.is_exempt, due, now) {
                    due_soon += 1;
                }
            }

            ok(
                &req.id,
                json!({
                    "role": "student",
                    "loginStreak": user.login_streak.unwrap_or(0),
                    "achievementCount": achievement_count,
                    "dueSoonCount": due_soon
                }),
            )
        }
        "teacher" => {
            let counts = conn.query_row(
                "SELECT
                   (SELECT COUNT(*) FROM student_assignments sa
                     JOIN master_assignments ma ON ma.id = sa.master_assignment_id
                     WHERE ma.teacher_id = ? AND sa.status = 'Submitted' AND sa.is_exempt = 0),
                   (SELECT COUNT(*) FROM users WHERE role = 'student'),
                   (SELECT COUNT(*) FROM master_assignments WHERE teacher_id = ?)",
                (&user_id, &user_id),
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
            );
            match counts {
                Ok((to_grade, students, masters)) => ok(
                    &req.id,
                    json!({
                        "role": "teacher",
                        "toGradeCount": to_grade,
                        "studentCount": students,
                        "activeAssignmentCount": masters
                    }),
                ),
                Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
        _ => {
            let counts = conn.query_row(
                "SELECT
                   (SELECT COUNT(*) FROM users),
                   (SELECT COUNT(*) FROM users WHERE role = 'student'),
                   (SELECT COUNT(*) FROM users WHERE role = 'teacher')",
                [],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
            );
            match counts {
                Ok((total, students, teachers)) => ok(
                    &req.id,
                    json!({
                        "role": "admin",
                        "userCount": total,
                        "studentCount": students,
                        "teacherCount": teachers
                    }),
                ),
                Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.upcoming" => Some(handle_upcoming(state, req)),
        "dashboard.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
