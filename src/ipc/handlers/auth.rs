use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{read_user_row, user_json, USER_COLS};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Credential check against the mock store. Multi-role accounts share
/// one email, so the result is a list; an empty list is the failure
/// signal by contract, never an error.
fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {USER_COLS} FROM users WHERE email = ? AND password = ? ORDER BY rowid"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map((&email, &password), read_user_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut users = Vec::with_capacity(rows.len());
    for row in &rows {
        match user_json(conn, row) {
            Ok(v) => users.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(&req.id, json!({ "users": users }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_auth_login(state, req)),
        _ => None,
    }
}
