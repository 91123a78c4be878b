use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_param, optional_str, required_i64, required_str, requester};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, SuggestionStatus};
use chrono::Duration;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Teacher-authored suggestions queue for moderation; coordinator-authored
/// ones are trusted and land approved directly.
fn handle_suggestions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "competencyCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };
    let target_level = match required_i64(req, "targetLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !workflow::is_valid_level(target_level) {
        return err(
            &req.id,
            "bad_params",
            "targetLevel must be between 1 and 5",
            Some(json!({ "targetLevel": target_level })),
        );
    }
    let title = match required_str(req, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = optional_str(req, "description").unwrap_or_default();
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM competencies WHERE code = ?", [&code], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "competency not found", None);
    }

    let status = if who.role.can_moderate() {
        SuggestionStatus::Approved
    } else {
        SuggestionStatus::Pending
    };

    let suggestion_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO suggestions(id, competency_code, author_id, target_level,
             title, description, status, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &suggestion_id,
            &code,
            &who.id,
            target_level,
            &title,
            &description,
            status.as_str(),
            now.to_rfc3339(),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "suggestionId": suggestion_id, "status": status.as_str() }),
    )
}

fn handle_suggestions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match optional_str(req, "status") {
        Some(raw) => match SuggestionStatus::parse(&raw) {
            Some(s) => Some(s),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown suggestion status",
                    Some(json!({ "status": raw })),
                )
            }
        },
        None => None,
    };

    // The moderation queue is coordinator-only; the approved bank is shared.
    if status != Some(SuggestionStatus::Approved) && !who.role.can_moderate() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }

    let (sql, with_status) = match status {
        Some(_) => (
            "SELECT s.id, s.competency_code, s.author_id, s.target_level, s.title,
                    s.description, s.status, s.submitted_at
             FROM suggestions s WHERE s.status = ? ORDER BY s.submitted_at",
            true,
        ),
        None => (
            "SELECT s.id, s.competency_code, s.author_id, s.target_level, s.title,
                    s.description, s.status, s.submitted_at
             FROM suggestions s ORDER BY s.submitted_at",
            false,
        ),
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "competencyCode": r.get::<_, String>(1)?,
            "authorId": r.get::<_, Option<String>>(2)?,
            "targetLevel": r.get::<_, i64>(3)?,
            "title": r.get::<_, String>(4)?,
            "description": r.get::<_, String>(5)?,
            "status": r.get::<_, String>(6)?,
            "submittedAt": r.get::<_, String>(7)?,
        }))
    };
    let rows = if with_status {
        stmt.query_map([status.map(|s| s.as_str()).unwrap_or_default()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(suggestions) => ok(&req.id, json!({ "suggestions": suggestions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_suggestions_moderate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !who.role.can_moderate() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }
    let suggestion_id = match required_str(req, "suggestionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let decision = match required_str(req, "decision") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target = match decision.as_str() {
        "approve" => SuggestionStatus::Approved,
        "reject" => SuggestionStatus::Rejected,
        other => {
            return err(
                &req.id,
                "bad_params",
                "decision must be approve or reject",
                Some(json!({ "decision": other })),
            )
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let current: Option<String> = match tx
        .query_row(
            "SELECT status FROM suggestions WHERE id = ?",
            [&suggestion_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(current) = current else {
        return err(&req.id, "not_found", "suggestion not found", None);
    };
    if SuggestionStatus::parse(&current) != Some(SuggestionStatus::Pending) {
        return err(
            &req.id,
            "bad_params",
            "suggestion has already been moderated",
            Some(json!({ "status": current })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE suggestions SET status = ? WHERE id = ?",
        (target.as_str(), &suggestion_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "suggestionId": suggestion_id, "status": target.as_str() }),
    )
}

/// Retention sweep: permanently drops rejected suggestions older than the
/// 30-day window. Safe to re-run on any schedule.
fn handle_suggestions_sweep(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cutoff = (now - Duration::days(workflow::SUGGESTION_RETENTION_DAYS)).to_rfc3339();

    let deleted = match conn.execute(
        "DELETE FROM suggestions WHERE status = 'rejected' AND submitted_at <= ?",
        [&cutoff],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "deletedCount": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "suggestions.create" => Some(handle_suggestions_create(state, req)),
        "suggestions.list" => Some(handle_suggestions_list(state, req)),
        "suggestions.moderate" => Some(handle_suggestions_moderate(state, req)),
        "suggestions.sweep" => Some(handle_suggestions_sweep(state, req)),
        _ => None,
    }
}
