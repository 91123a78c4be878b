use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, requester};
use crate::ipc::types::{AppState, Request};
use crate::workflow::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_role(req: &Request, raw: &str) -> Result<Role, serde_json::Value> {
    Role::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "role must be one of: teacher, coordinator",
            Some(json!({ "role": raw })),
        )
    })
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let role = match required_str(req, "role").and_then(|r| parse_role(req, &r)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Bootstrap: an empty user table accepts its first coordinator without a
    // requester; everything after that is coordinator-gated.
    let user_count: i64 = match conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if user_count == 0 {
        if role != Role::Coordinator {
            return err(
                &req.id,
                "forbidden",
                "the first user must be a coordinator",
                None,
            );
        }
    } else {
        let who = match requester(conn, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if !who.role.can_manage_school() {
            return err(&req.id, "forbidden", "coordinator role required", None);
        }
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, display_name, role) VALUES(?, ?, ?, ?)",
        (&user_id, &username, &display_name, role.as_str()),
    ) {
        if crate::ipc::helpers::is_unique_violation(&e) {
            return err(
                &req.id,
                "duplicate",
                "username already exists",
                Some(json!({ "username": username })),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "username": username, "role": role.as_str() }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, username, display_name, role FROM users ORDER BY display_name, username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "role": row.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !who.role.can_manage_school() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    if let Some(display_name) = optional_str(req, "displayName") {
        if let Err(e) = conn.execute(
            "UPDATE users SET display_name = ? WHERE id = ?",
            (display_name.trim(), &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(raw_role) = optional_str(req, "role") {
        let role = match parse_role(req, &raw_role) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if let Err(e) = conn.execute(
            "UPDATE users SET role = ? WHERE id = ?",
            (role.as_str(), &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !who.role.can_manage_school() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if user_id == who.id {
        return err(&req.id, "bad_params", "cannot delete yourself", None);
    }

    let report_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE teacher_id = ?",
        [&user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if report_count > 0 {
        return err(
            &req.id,
            "in_use",
            "user still owns reports",
            Some(json!({ "reportCount": report_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Suggestions outlive their author; only the link is cleared.
    if let Err(e) = tx.execute(
        "UPDATE suggestions SET author_id = NULL WHERE author_id = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute("DELETE FROM class_teachers WHERE teacher_id = ?", [&user_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let deleted = match tx.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "user not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
