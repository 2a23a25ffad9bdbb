use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers::{forum_post_json, get_user};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_forums_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let tag = req.params.get("tag").and_then(|v| v.as_str());

    let mut stmt = match conn.prepare("SELECT id, tags FROM forum_posts ORDER BY rowid") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // The tag universe feeds the filter bar; first-seen order.
    let mut all_tags: Vec<String> = Vec::new();
    let mut posts = Vec::new();
    for (post_id, tags_raw) in &rows {
        let tags: Vec<String> = serde_json::from_str(tags_raw).unwrap_or_default();
        for t in &tags {
            if !all_tags.contains(t) {
                all_tags.push(t.clone());
            }
        }
        if let Some(wanted) = tag {
            if !tags.iter().any(|t| t == wanted) {
                continue;
            }
        }
        match forum_post_json(conn, post_id) {
            Ok(v) => posts.push(v),
            Err(e) => return op_err(&req.id, e),
        }
    }

    ok(&req.id, json!({ "posts": posts, "tags": all_tags }))
}

fn handle_forums_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let post_id = match req.params.get("postId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing postId", None),
    };

    match forum_post_json(conn, &post_id) {
        Ok(v) => ok(&req.id, json!({ "post": v })),
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_forums_create_post(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let author_id = match req.params.get("authorId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing authorId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "validation", "title must not be empty", None),
    };
    let content = match req.params.get("content").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "validation", "content must not be empty", None),
    };
    let tags: Vec<String> = req
        .params
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let author = match get_user(conn, &author_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "author not found", None),
        Err(e) => return op_err(&req.id, e),
    };

    let post_id = format!("post-{}", Uuid::new_v4());
    if let Err(e) = conn.execute(
        "INSERT INTO forum_posts(id, author_id, author_name, author_avatar_url, title, content, tags, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &post_id,
            &author.id,
            &author.name,
            &author.avatar_url,
            &title,
            &content,
            serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string()),
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "forum_posts" })),
        );
    }

    match forum_post_json(conn, &post_id) {
        Ok(v) => ok(&req.id, json!({ "post": v })),
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_forums_reply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let post_id = match req.params.get("postId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing postId", None),
    };
    let author_id = match req.params.get("authorId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing authorId", None),
    };
    let content = match req.params.get("content").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "validation", "content must not be empty", None),
    };

    let post_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM forum_posts WHERE id = ?", [&post_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if post_exists.is_none() {
        return err(&req.id, "not_found", "forum post not found", None);
    }

    let author = match get_user(conn, &author_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "author not found", None),
        Err(e) => return op_err(&req.id, e),
    };

    let reply_id = format!("r-{}", Uuid::new_v4());
    if let Err(e) = conn.execute(
        "INSERT INTO forum_replies(id, post_id, author_id, author_name, author_avatar_url, content, upvotes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &reply_id,
            &post_id,
            &author.id,
            &author.name,
            &author.avatar_url,
            &content,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "forum_replies" })),
        );
    }

    match forum_post_json(conn, &post_id) {
        Ok(v) => ok(&req.id, json!({ "post": v })),
        Err(e) => op_err(&req.id, e),
    }
}

fn handle_forums_upvote(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_store", "open a store first", None);
    };

    let post_id = match req.params.get("postId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing postId", None),
    };
    let reply_id = match req.params.get("replyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing replyId", None),
    };

    let updated = match conn.execute(
        "UPDATE forum_replies SET upvotes = upvotes + 1 WHERE id = ? AND post_id = ?",
        (&reply_id, &post_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "reply not found", None);
    }

    match forum_post_json(conn, &post_id) {
        Ok(v) => ok(&req.id, json!({ "post": v })),
        Err(e) => op_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "forums.list" => Some(handle_forums_list(state, req)),
        "forums.get" => Some(handle_forums_get(state, req)),
        "forums.createPost" => Some(handle_forums_create_post(state, req)),
        "forums.reply" => Some(handle_forums_reply(state, req)),
        "forums.upvote" => Some(handle_forums_upvote(state, req)),
        _ => None,
    }
}
