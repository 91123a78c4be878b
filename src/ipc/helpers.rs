use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, ReportStatus, Role, Subject};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// "Now" is injectable on any time-sensitive method so tests can pin it.
pub fn now_param(req: &Request) -> Result<DateTime<Utc>, serde_json::Value> {
    match req.params.get("now").and_then(|v| v.as_str()) {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| {
                err(
                    &req.id,
                    "bad_params",
                    "now must be an RFC 3339 timestamp",
                    Some(json!({ "now": s })),
                )
            }),
        None => Ok(Utc::now()),
    }
}

#[derive(Debug, Clone)]
pub struct Requester {
    pub id: String,
    pub role: Role,
}

/// The identity layer is external; requests name the acting user and the
/// stored role is trusted for every authorization guard.
pub fn requester(conn: &Connection, req: &Request) -> Result<Requester, serde_json::Value> {
    let id = required_str(req, "requesterId")?;
    let role_str: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let Some(role_str) = role_str else {
        return Err(err(&req.id, "not_found", "requester not found", None));
    };
    let Some(role) = Role::parse(&role_str) else {
        return Err(err(
            &req.id,
            "forbidden",
            "requester has an unknown role",
            Some(json!({ "role": role_str })),
        ));
    };
    Ok(Requester { id, role })
}

#[derive(Debug, Clone)]
pub struct ActivePeriod {
    pub year: i64,
    pub trimester: String,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
}

impl ActivePeriod {
    pub fn matches(&self, trimester: &str, year: i64) -> bool {
        self.trimester == trimester && self.year == year
    }

    pub fn window_open(&self, today: NaiveDate) -> bool {
        workflow::editing_window_open(today, self.window_start, self.window_end)
    }
}

pub fn active_period(conn: &Connection, req: &Request) -> Result<ActivePeriod, serde_json::Value> {
    conn.query_row(
        "SELECT year, trimester, window_start, window_end FROM system_period WHERE id = 1",
        [],
        |r| {
            let year: i64 = r.get(0)?;
            let trimester: String = r.get(1)?;
            let start: Option<String> = r.get(2)?;
            let end: Option<String> = r.get(3)?;
            Ok((year, trimester, start, end))
        },
    )
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
    .map(|(year, trimester, start, end)| ActivePeriod {
        year,
        trimester,
        window_start: start.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        window_end: end.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
    })
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub trimester: String,
    pub year: i64,
    pub status: ReportStatus,
    pub feedback: String,
}

pub fn load_report(
    conn: &Connection,
    req: &Request,
    report_id: &str,
) -> Result<ReportRow, serde_json::Value> {
    let row = conn
        .query_row(
            "SELECT id, student_id, teacher_id, trimester, year, status, feedback
             FROM reports WHERE id = ?",
            [report_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let Some((id, student_id, teacher_id, trimester, year, status, feedback)) = row else {
        return Err(err(&req.id, "not_found", "report not found", None));
    };
    let Some(status) = ReportStatus::parse(&status) else {
        return Err(err(
            &req.id,
            "db_query_failed",
            "report has an unknown status",
            Some(json!({ "status": status })),
        ));
    };
    Ok(ReportRow {
        id,
        student_id,
        teacher_id,
        trimester,
        year,
        status,
        feedback,
    })
}

/// The mutation guard from the lifecycle: ownership, editable state, active
/// period, open window. Callers run it inside their transaction, after
/// re-reading the report row.
pub fn ensure_report_editable(
    conn: &Connection,
    req: &Request,
    report: &ReportRow,
    who: &Requester,
    now: DateTime<Utc>,
) -> Result<(), serde_json::Value> {
    if !who.role.can_grade(&report.teacher_id, &who.id) {
        return Err(err(
            &req.id,
            "forbidden",
            "report belongs to another teacher",
            None,
        ));
    }
    if !report.status.is_editable() {
        return Err(err(
            &req.id,
            "report_locked",
            "report is not editable in its current state",
            Some(json!({ "status": report.status.as_str() })),
        ));
    }
    let period = active_period(conn, req)?;
    if !period.matches(&report.trimester, report.year) {
        return Err(err(
            &req.id,
            "report_locked",
            "report period is not the active period",
            Some(json!({
                "reportPeriod": { "trimester": report.trimester, "year": report.year },
                "activePeriod": { "trimester": period.trimester, "year": period.year },
            })),
        ));
    }
    if !period.window_open(now.date_naive()) {
        return Err(err(
            &req.id,
            "report_locked",
            "editing window is closed",
            None,
        ));
    }
    Ok(())
}

/// One row per assessment: (subject, graded?). Feeds the completion
/// calculator.
pub fn report_subject_rows(
    conn: &Connection,
    req: &Request,
    report_id: &str,
) -> Result<Vec<(Subject, bool)>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT c.subject, a.level IS NOT NULL
             FROM assessments a
             JOIN competencies c ON c.code = a.competency_code
             WHERE a.report_id = ?",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let rows = stmt
        .query_map([report_id], |r| {
            let subject: String = r.get(0)?;
            let graded: bool = r.get(1)?;
            Ok((subject, graded))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    Ok(rows
        .into_iter()
        .filter_map(|(s, graded)| Subject::parse(&s).map(|subj| (subj, graded)))
        .collect())
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
