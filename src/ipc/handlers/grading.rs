use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_report_editable, is_unique_violation, load_report, now_param, required_str,
    requester,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, Subject};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_subject(req: &Request, raw: &str) -> Result<Subject, serde_json::Value> {
    Subject::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown subject",
            Some(json!({ "subject": raw })),
        )
    })
}

fn student_grade_level(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<String, serde_json::Value> {
    conn.query_row(
        "SELECT c.grade_level FROM students s JOIN classes c ON c.id = s.class_id WHERE s.id = ?",
        [student_id],
        |r| r.get(0),
    )
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Attach an (ungraded) competency to the report. The competency must exist
/// and apply to the student's grade.
fn handle_assessments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let code = match required_str(req, "competencyCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
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
    if let Err(e) = ensure_report_editable(&tx, req, &report, &who, now) {
        return e;
    }

    let competency: Option<String> = match tx
        .query_row(
            "SELECT grade_levels FROM competencies WHERE code = ?",
            [&code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(grade_levels) = competency else {
        return err(&req.id, "not_found", "competency not found", None);
    };
    let grade_level = match student_grade_level(&tx, req, &report.student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !workflow::applies_to_grade(&grade_levels, &grade_level) {
        return err(
            &req.id,
            "bad_params",
            "competency does not apply to this student's grade",
            Some(json!({ "competencyCode": code, "gradeLevel": grade_level })),
        );
    }

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO assessments(id, report_id, competency_code, level, note)
         VALUES(?, ?, ?, NULL, '')",
        (&assessment_id, &report_id, &code),
    ) {
        let _ = tx.rollback();
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "duplicate",
                "competency is already on this report",
                Some(json!({ "competencyCode": code })),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "assessmentId": assessment_id, "competencyCode": code }),
    )
}

/// Remove an assessment. Graded rows are protected: the grade must be
/// cleared first.
fn handle_assessments_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_id = match required_str(req, "assessmentId") {
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
    let row: Option<(String, Option<i64>)> = match tx
        .query_row(
            "SELECT report_id, level FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((report_id, level)) = row else {
        return err(&req.id, "not_found", "assessment not found", None);
    };
    let report = match load_report(&tx, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = ensure_report_editable(&tx, req, &report, &who, now) {
        return e;
    }
    if level.is_some() {
        return err(
            &req.id,
            "has_grade",
            "assessment already has a saved level; clear it first",
            Some(json!({ "assessmentId": assessment_id })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Batch grade save for one subject. Applies fully or not at all.
fn handle_assessments_save_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject = match required_str(req, "subject").and_then(|s| parse_subject(req, &s)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match now_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(grades) = req.params.get("grades").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing grades", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let report = match load_report(&tx, req, &report_id) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = ensure_report_editable(&tx, req, &report, &who, now) {
        return e;
    }

    let mut updated = 0usize;
    for entry in grades {
        let Some(code) = entry.get("competencyCode").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "grade entry missing competencyCode", None);
        };
        let code = code.trim().to_ascii_uppercase();
        let Some(level) = entry.get("level").and_then(|v| v.as_i64()) else {
            return err(
                &req.id,
                "bad_params",
                "grade entry missing level",
                Some(json!({ "competencyCode": code })),
            );
        };
        if !workflow::is_valid_level(level) {
            return err(
                &req.id,
                "bad_params",
                "level must be between 1 and 5",
                Some(json!({ "competencyCode": code, "level": level })),
            );
        }
        let note = entry
            .get("note")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        // Only rows already attached to the report, and only within the
        // subject being saved.
        let n = match tx.execute(
            "UPDATE assessments SET level = ?, note = ?
             WHERE report_id = ? AND competency_code = ?
               AND competency_code IN (SELECT code FROM competencies WHERE subject = ?)",
            (level, note, &report_id, &code, subject.as_str()),
        ) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        };
        if n == 0 {
            let _ = tx.rollback();
            return err(
                &req.id,
                "not_found",
                "assessment not on this report for this subject",
                Some(json!({ "competencyCode": code, "subject": subject.as_str() })),
            );
        }
        updated += 1;
    }

    if let Err(e) = tx.execute(
        "UPDATE reports SET updated_at = ? WHERE id = ?",
        (now.to_rfc3339(), &report_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "updated": updated }))
}

/// Reset a whole subject on the report: every assessment goes, graded or not.
fn handle_assessments_clear_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject = match required_str(req, "subject").and_then(|s| parse_subject(req, &s)) {
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
    if let Err(e) = ensure_report_editable(&tx, req, &report, &who, now) {
        return e;
    }

    let deleted = match tx.execute(
        "DELETE FROM assessments
         WHERE report_id = ?
           AND competency_code IN (SELECT code FROM competencies WHERE subject = ?)",
        (&report_id, subject.as_str()),
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.add" => Some(handle_assessments_add(state, req)),
        "assessments.remove" => Some(handle_assessments_remove(state, req)),
        "assessments.saveGrades" => Some(handle_assessments_save_grades(state, req)),
        "assessments.clearSubject" => Some(handle_assessments_clear_subject(state, req)),
        _ => None,
    }
}
