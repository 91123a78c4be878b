use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{active_period, db_conn, optional_i64, optional_str, requester};
use crate::ipc::types::{AppState, Request};
use crate::workflow;
use chrono::NaiveDate;
use serde_json::json;

fn handle_period_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match active_period(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "year": period.year,
            "trimester": period.trimester,
            "windowStart": period.window_start.map(|d| d.to_string()),
            "windowEnd": period.window_end.map(|d| d.to_string()),
        }),
    )
}

/// Update the singleton in place. The row is created at open and never
/// deleted; empty-string window bounds clear them.
fn handle_period_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    if let Some(year) = optional_i64(req, "year") {
        if let Err(e) = conn.execute("UPDATE system_period SET year = ? WHERE id = 1", [year]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(trimester) = optional_str(req, "trimester") {
        if !workflow::is_valid_trimester(&trimester) {
            return err(
                &req.id,
                "bad_params",
                "trimester must be 1, 2 or 3",
                Some(json!({ "trimester": trimester })),
            );
        }
        if let Err(e) = conn.execute(
            "UPDATE system_period SET trimester = ? WHERE id = 1",
            [&trimester],
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    for (key, column) in [("windowStart", "window_start"), ("windowEnd", "window_end")] {
        let Some(raw) = optional_str(req, key) else {
            continue;
        };
        let value = if raw.trim().is_empty() {
            None
        } else {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(d) => Some(d.to_string()),
                Err(_) => {
                    return err(
                        &req.id,
                        "bad_params",
                        "window dates must be YYYY-MM-DD",
                        Some(json!({ key: raw })),
                    )
                }
            }
        };
        let sql = format!("UPDATE system_period SET {} = ? WHERE id = 1", column);
        if let Err(e) = conn.execute(&sql, [&value]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    handle_period_get(state, req)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "period.get" => Some(handle_period_get(state, req)),
        "period.set" => Some(handle_period_set(state, req)),
        _ => None,
    }
}
