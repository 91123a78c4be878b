use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{active_period, db_conn, requester};
use crate::ipc::types::{AppState, Request};
use crate::workflow::Role;
use serde_json::json;

fn count(
    conn: &rusqlite::Connection,
    req: &Request,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<i64, serde_json::Value> {
    conn.query_row(sql, params, |r| r.get(0))
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Role-split landing KPIs: teachers see their own workload for the active
/// period, coordinators see the whole school.
fn handle_dashboard_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match active_period(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };

    match who.role {
        Role::Teacher => {
            let class_count = match count(
                conn,
                req,
                "SELECT COUNT(*) FROM class_teachers WHERE teacher_id = ?",
                [&who.id],
            ) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let student_count = match count(
                conn,
                req,
                "SELECT COUNT(DISTINCT s.id)
                 FROM students s
                 JOIN class_teachers ct ON ct.class_id = s.class_id
                 WHERE ct.teacher_id = ?",
                [&who.id],
            ) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let started = match count(
                conn,
                req,
                "SELECT COUNT(*) FROM reports
                 WHERE teacher_id = ? AND year = ? AND trimester = ?",
                rusqlite::params![&who.id, period.year, &period.trimester],
            ) {
                Ok(v) => v,
                Err(e) => return e,
            };

            ok(
                &req.id,
                json!({
                    "role": who.role.as_str(),
                    "classCount": class_count,
                    "studentCount": student_count,
                    "reportsStarted": started,
                    "reportsPending": (student_count - started).max(0),
                }),
            )
        }
        Role::Coordinator => {
            let student_count = match count(conn, req, "SELECT COUNT(*) FROM students", []) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let class_count = match count(conn, req, "SELECT COUNT(*) FROM classes", []) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let pending_suggestions = match count(
                conn,
                req,
                "SELECT COUNT(*) FROM suggestions WHERE status = 'pending'",
                [],
            ) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let under_review = match count(
                conn,
                req,
                "SELECT COUNT(*) FROM reports WHERE status = 'under_review'",
                [],
            ) {
                Ok(v) => v,
                Err(e) => return e,
            };

            ok(
                &req.id,
                json!({
                    "role": who.role.as_str(),
                    "classCount": class_count,
                    "studentCount": student_count,
                    "pendingSuggestions": pending_suggestions,
                    "reportsUnderReview": under_review,
                }),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.get" => Some(handle_dashboard_get(state, req)),
        _ => None,
    }
}
