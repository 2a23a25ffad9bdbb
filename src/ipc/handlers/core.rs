use crate::db;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::types::{AppState, Request};
use crate::seed;
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "storeOpen": state.db.is_some()
        }),
    )
}

/// Opens a fresh in-memory store, replacing any existing one. Callers
/// (and tests) get full isolation: nothing survives a re-open.
fn handle_store_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    match db::open_store() {
        Ok(conn) => {
            state.db = Some(conn);
            ok(&req.id, json!({ "open": true }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_store_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    match seed::load_demo_data(conn) {
        Ok(counts) => ok(
            &req.id,
            json!({
                "users": counts.users,
                "masterAssignments": counts.master_assignments,
                "studentAssignments": counts.student_assignments,
                "forumPosts": counts.forum_posts,
                "conversations": counts.conversations
            }),
        ),
        Err(e) => op_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "store.open" => Some(handle_store_open(state, req)),
        "store.seed" => Some(handle_store_seed(state, req)),
        _ => None,
    }
}
