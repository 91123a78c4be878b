use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_period, db_conn, is_unique_violation, load_report, now_param, optional_i64,
    optional_str, report_subject_rows, required_str, requester, ReportRow, Requester,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, ReportStatus, Role};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_context(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<(String, String, String, String), serde_json::Value> {
    let row = conn
        .query_row(
            "SELECT s.full_name, s.class_id, c.name, c.grade_level
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ?",
            [student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    row.ok_or_else(|| err(&req.id, "not_found", "student not found", None))
}

fn ensure_student_access(
    conn: &Connection,
    req: &Request,
    who: &Requester,
    class_id: &str,
) -> Result<(), serde_json::Value> {
    if who.role == Role::Coordinator {
        return Ok(());
    }
    let assigned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM class_teachers WHERE class_id = ? AND teacher_id = ?",
            (class_id, &who.id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if assigned.is_none() {
        return Err(err(
            &req.id,
            "forbidden",
            "not assigned to this student's class",
            None,
        ));
    }
    Ok(())
}

fn ensure_report_visible(
    req: &Request,
    report: &ReportRow,
    who: &Requester,
) -> Result<(), serde_json::Value> {
    if who.role == Role::Coordinator || report.teacher_id == who.id {
        return Ok(());
    }
    Err(err(
        &req.id,
        "forbidden",
        "report belongs to another teacher",
        None,
    ))
}

fn report_json(report: &ReportRow) -> serde_json::Value {
    json!({
        "id": report.id,
        "studentId": report.student_id,
        "teacherId": report.teacher_id,
        "trimester": report.trimester,
        "year": report.year,
        "status": report.status.as_str(),
        "feedback": report.feedback,
    })
}

fn insert_report(
    conn: &Connection,
    req: &Request,
    student_id: &str,
    teacher_id: &str,
    trimester: &str,
    year: i64,
    now: DateTime<Utc>,
) -> Result<String, serde_json::Value> {
    let report_id = Uuid::new_v4().to_string();
    let stamp = now.to_rfc3339();
    conn.execute(
        "INSERT INTO reports(id, student_id, teacher_id, trimester, year, status,
             feedback, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, '', ?, ?)",
        (
            &report_id,
            student_id,
            teacher_id,
            trimester,
            year,
            ReportStatus::Draft.as_str(),
            &stamp,
            &stamp,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            err(
                &req.id,
                "duplicate",
                "a report for this student and period already exists",
                Some(json!({
                    "studentId": student_id,
                    "trimester": trimester,
                    "year": year,
                })),
            )
        } else {
            err(&req.id, "db_insert_failed", e.to_string(), None)
        }
    })?;
    Ok(report_id)
}

/// Get-or-create the draft for (student, active period). The grading screens
/// always enter through here.
fn handle_reports_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, class_id, _, _) = match student_context(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_student_access(conn, req, &who, &class_id) {
        return e;
    }
    let period = match active_period(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM reports WHERE student_id = ? AND trimester = ? AND year = ?",
            (&student_id, &period.trimester, period.year),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let (report_id, created) = match existing {
        Some(id) => (id, false),
        None => {
            match insert_report(
                conn,
                req,
                &student_id,
                &who.id,
                &period.trimester,
                period.year,
                now,
            ) {
                Ok(id) => (id, true),
                Err(e) => return e,
            }
        }
    };

    let report = match load_report(conn, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let mut body = report_json(&report);
    body["created"] = json!(created);
    ok(&req.id, json!({ "report": body }))
}

/// Explicit create for a named period; surfaces the uniqueness constraint
/// instead of reusing the existing row.
fn handle_reports_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, class_id, _, _) = match student_context(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_student_access(conn, req, &who, &class_id) {
        return e;
    }
    let period = match active_period(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let trimester = optional_str(req, "trimester").unwrap_or_else(|| period.trimester.clone());
    if !workflow::is_valid_trimester(&trimester) {
        return err(
            &req.id,
            "bad_params",
            "trimester must be 1, 2 or 3",
            Some(json!({ "trimester": trimester })),
        );
    }
    let year = optional_i64(req, "year").unwrap_or(period.year);

    match insert_report(conn, req, &student_id, &who.id, &trimester, year, now) {
        Ok(report_id) => ok(&req.id, json!({ "reportId": report_id })),
        Err(e) => e,
    }
}

fn handle_reports_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report = match load_report(conn, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = ensure_report_visible(req, &report, &who) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.competency_code, c.subject, a.level, a.note
         FROM assessments a
         JOIN competencies c ON c.code = a.competency_code
         WHERE a.report_id = ?
         ORDER BY c.subject, a.competency_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assessments = match stmt
        .query_map([&report_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "competencyCode": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "level": r.get::<_, Option<i64>>(3)?,
                "note": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "report": report_json(&report), "assessments": assessments }),
    )
}

/// Review queue and history listing. Teachers see their own reports only.
fn handle_reports_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let status = match optional_str(req, "status") {
        Some(raw) => match ReportStatus::parse(&raw) {
            Some(s) => Some(s),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown report status",
                    Some(json!({ "status": raw })),
                )
            }
        },
        None => None,
    };

    let mut sql = String::from(
        "SELECT r.id, r.student_id, s.full_name, r.teacher_id, u.display_name,
                r.trimester, r.year, r.status, r.feedback, r.updated_at
         FROM reports r
         JOIN students s ON s.id = r.student_id
         JOIN users u ON u.id = r.teacher_id
         WHERE 1 = 1",
    );
    let mut params: Vec<rusqlite::types::Value> = Vec::new();
    if who.role == Role::Teacher {
        sql.push_str(" AND r.teacher_id = ?");
        params.push(who.id.clone().into());
    }
    if let Some(s) = status {
        sql.push_str(" AND r.status = ?");
        params.push(s.as_str().to_string().into());
    }
    if let Some(year) = optional_i64(req, "year") {
        sql.push_str(" AND r.year = ?");
        params.push(year.into());
    }
    if let Some(trimester) = optional_str(req, "trimester") {
        sql.push_str(" AND r.trimester = ?");
        params.push(trimester.into());
    }
    sql.push_str(" ORDER BY r.updated_at DESC, s.full_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "teacherId": r.get::<_, String>(3)?,
                "teacherName": r.get::<_, String>(4)?,
                "trimester": r.get::<_, String>(5)?,
                "year": r.get::<_, i64>(6)?,
                "status": r.get::<_, String>(7)?,
                "feedback": r.get::<_, String>(8)?,
                "updatedAt": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// The per-subject checklist for the grading screen: how many competencies
/// the student's grade expects, how many were assessed and graded.
fn handle_reports_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report = match load_report(conn, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = ensure_report_visible(req, &report, &who) {
        return e;
    }
    let (_, _, _, grade_level) = match student_context(conn, req, &report.student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = match report_subject_rows(conn, req, &report_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completion = workflow::subject_completion(rows);

    // Expected counts come from the catalog, filtered by the student's grade.
    let mut stmt = match conn.prepare("SELECT subject, grade_levels FROM competencies") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let catalog = match stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let subjects: Vec<serde_json::Value> = workflow::SUBJECTS
        .iter()
        .map(|s| {
            let expected = catalog
                .iter()
                .filter(|(subject, grades)| {
                    subject == s.as_str() && workflow::applies_to_grade(grades, &grade_level)
                })
                .count();
            let c = completion
                .iter()
                .find(|c| c.subject == s.as_str())
                .cloned()
                .unwrap_or(workflow::SubjectCompletion {
                    subject: s.as_str(),
                    assessed: 0,
                    graded: 0,
                    complete: false,
                });
            json!({
                "subject": s.as_str(),
                "displayName": s.display_name(),
                "expected": expected,
                "assessed": c.assessed,
                "graded": c.graded,
                "complete": c.complete,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "reportId": report_id,
            "gradeLevel": grade_level,
            "subjects": subjects,
            "percent": workflow::completion_percent(&completion),
        }),
    )
}

fn handle_reports_completion(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_report(conn, req, &report_id) {
        return e;
    }

    let rows = match report_subject_rows(conn, req, &report_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completion = workflow::subject_completion(rows);
    let percent = workflow::completion_percent(&completion);
    let per_subject: serde_json::Map<String, serde_json::Value> = completion
        .iter()
        .map(|c| (c.subject.to_string(), json!(c.complete)))
        .collect();

    ok(
        &req.id,
        json!({
            "reportId": report_id,
            "perSubject": per_subject,
            "subjects": completion,
            "percent": percent,
        }),
    )
}

/// Teacher submit: draft/returned -> under_review, guarded by the completion
/// rule and the active-period gate. Runs in a transaction that re-reads the
/// current status so a concurrent coordinator action cannot be clobbered.
fn handle_reports_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let report = match load_report(&tx, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if !who.role.can_grade(&report.teacher_id, &who.id) {
        return err(
            &req.id,
            "forbidden",
            "report belongs to another teacher",
            None,
        );
    }
    if !report.status.is_editable() {
        return err(
            &req.id,
            "report_locked",
            "only draft or returned reports can be submitted",
            Some(json!({ "status": report.status.as_str() })),
        );
    }
    let period = match active_period(&tx, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if !period.matches(&report.trimester, report.year) {
        return err(
            &req.id,
            "report_locked",
            "report period is not the active period",
            Some(json!({
                "reportPeriod": { "trimester": report.trimester, "year": report.year },
                "activePeriod": { "trimester": period.trimester, "year": period.year },
            })),
        );
    }
    if !period.window_open(now.date_naive()) {
        return err(&req.id, "report_locked", "editing window is closed", None);
    }

    let rows = match report_subject_rows(&tx, req, &report_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completion = workflow::subject_completion(rows);
    let blocking = workflow::blocking_subjects(&completion);
    if !blocking.is_empty() {
        return err(
            &req.id,
            "incomplete_subjects",
            "some subjects have ungraded assessments",
            Some(json!({ "subjects": blocking })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE reports SET status = ?, updated_at = ? WHERE id = ?",
        (
            ReportStatus::UnderReview.as_str(),
            now.to_rfc3339(),
            &report_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "reportId": report_id, "status": ReportStatus::UnderReview.as_str() }),
    )
}

fn handle_reports_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !who.role.can_review() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let report = match load_report(&tx, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if report.status != ReportStatus::UnderReview {
        return err(
            &req.id,
            "report_locked",
            "only reports under review can be approved",
            Some(json!({ "status": report.status.as_str() })),
        );
    }

    // Approval clears whatever correction feedback was left behind.
    if let Err(e) = tx.execute(
        "UPDATE reports SET status = ?, feedback = '', updated_at = ? WHERE id = ?",
        (
            ReportStatus::Approved.as_str(),
            now.to_rfc3339(),
            &report_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "reportId": report_id, "status": ReportStatus::Approved.as_str() }),
    )
}

fn handle_reports_return(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !who.role.can_review() {
        return err(&req.id, "forbidden", "coordinator role required", None);
    }
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reason = match optional_str(req, "reason") {
        Some(r) => r.trim().to_string(),
        None => String::new(),
    };
    if reason.is_empty() {
        return err(
            &req.id,
            "missing_reason",
            "a correction reason is required",
            None,
        );
    }
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let report = match load_report(&tx, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if report.status != ReportStatus::UnderReview {
        return err(
            &req.id,
            "report_locked",
            "only reports under review can be returned",
            Some(json!({ "status": report.status.as_str() })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE reports SET status = ?, feedback = ?, updated_at = ? WHERE id = ?",
        (
            ReportStatus::Returned.as_str(),
            &reason,
            now.to_rfc3339(),
            &report_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "reportId": report_id, "status": ReportStatus::Returned.as_str() }),
    )
}

/// The payload the external document renderer consumes. Each graded
/// assessment carries up to two matching approved suggestions; an optional
/// seed pins the sample for tests.
fn handle_reports_render_context(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report = match load_report(conn, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = ensure_report_visible(req, &report, &who) {
        return e;
    }
    let (student_name, _, class_name, grade_level) =
        match student_context(conn, req, &report.student_id) {
            Ok(v) => v,
            Err(e) => return e,
        };
    let teacher_name: String = match conn.query_row(
        "SELECT display_name FROM users WHERE id = ?",
        [&report.teacher_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.competency_code, c.subject, c.skill, a.level, a.note
         FROM assessments a
         JOIN competencies c ON c.code = a.competency_code
         WHERE a.report_id = ?
         ORDER BY c.subject, a.competency_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assessments = match stmt
        .query_map([&report_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<i64>>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let seed = req.params.get("seed").and_then(|v| v.as_u64());
    let mut rng = workflow::sampling_rng(seed);

    let mut out = Vec::with_capacity(assessments.len());
    for (assessment_id, code, subject, skill, level, note) in assessments {
        let suggestions = match level {
            Some(level) => {
                let mut s = match conn.prepare(
                    "SELECT id, title, description, target_level
                     FROM suggestions
                     WHERE competency_code = ? AND target_level = ? AND status = 'approved'
                     ORDER BY id",
                ) {
                    Ok(s) => s,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                };
                let matches = match s
                    .query_map((&code, level), |r| {
                        Ok(json!({
                            "id": r.get::<_, String>(0)?,
                            "title": r.get::<_, String>(1)?,
                            "description": r.get::<_, String>(2)?,
                            "targetLevel": r.get::<_, i64>(3)?,
                        }))
                    })
                    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                {
                    Ok(v) => v,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                };
                workflow::sample_suggestions(&matches, &mut rng)
            }
            None => Vec::new(),
        };

        out.push(json!({
            "assessmentId": assessment_id,
            "competencyCode": code,
            "subject": subject,
            "skill": skill,
            "level": level,
            "note": note,
            "suggestions": suggestions,
        }));
    }

    ok(
        &req.id,
        json!({
            "report": report_json(&report),
            "studentName": student_name,
            "className": class_name,
            "gradeLevel": grade_level,
            "teacherName": teacher_name,
            "assessments": out,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.open" => Some(handle_reports_open(state, req)),
        "reports.create" => Some(handle_reports_create(state, req)),
        "reports.get" => Some(handle_reports_get(state, req)),
        "reports.list" => Some(handle_reports_list(state, req)),
        "reports.subjects" => Some(handle_reports_subjects(state, req)),
        "reports.completion" => Some(handle_reports_completion(state, req)),
        "reports.submit" => Some(handle_reports_submit(state, req)),
        "reports.approve" => Some(handle_reports_approve(state, req)),
        "reports.return" => Some(handle_reports_return(state, req)),
        "reports.renderContext" => Some(handle_reports_render_context(state, req)),
        _ => None,
    }
}
