use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_period, db_conn, optional_i64, optional_str, report_subject_rows, required_str,
    requester, Requester,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, ReportStatus, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn ensure_class_access(
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
            "not assigned to this class",
            None,
        ));
    }
    Ok(())
}

fn class_exists(
    conn: &Connection,
    req: &Request,
    class_id: &str,
) -> Result<(), serde_json::Value> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "class not found", None));
    }
    Ok(())
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let grade_level = match required_str(req, "gradeLevel") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };
    if !workflow::is_grade_level(&grade_level) {
        return err(
            &req.id,
            "bad_params",
            "unknown grade level",
            Some(json!({ "gradeLevel": grade_level })),
        );
    }
    let school_year = match optional_i64(req, "schoolYear") {
        Some(v) => v,
        None => 2025,
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, grade_level, school_year) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &grade_level, school_year),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Teachers see only their assigned classes; coordinators see all.
    // Counts via correlated subqueries to avoid double-counting from joins.
    let base = "SELECT
           c.id,
           c.name,
           c.grade_level,
           c.school_year,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c";
    let sql = match who.role {
        Role::Coordinator => format!("{} ORDER BY c.name", base),
        Role::Teacher => format!(
            "{} WHERE c.id IN (SELECT class_id FROM class_teachers WHERE teacher_id = ?)
             ORDER BY c.name",
            base
        ),
    };
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "gradeLevel": row.get::<_, String>(2)?,
            "schoolYear": row.get::<_, i64>(3)?,
            "studentCount": row.get::<_, i64>(4)?,
        }))
    };
    let rows = match who.role {
        Role::Coordinator => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        Role::Teacher => stmt
            .query_map([&who.id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_exists(conn, req, &class_id) {
        return e;
    }

    if let Some(name) = optional_str(req, "name") {
        if let Err(e) = conn.execute(
            "UPDATE classes SET name = ? WHERE id = ?",
            (name.trim(), &class_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(grade_level) = optional_str(req, "gradeLevel") {
        let grade_level = grade_level.trim().to_ascii_uppercase();
        if !workflow::is_grade_level(&grade_level) {
            return err(
                &req.id,
                "bad_params",
                "unknown grade level",
                Some(json!({ "gradeLevel": grade_level })),
            );
        }
        if let Err(e) = conn.execute(
            "UPDATE classes SET grade_level = ? WHERE id = ?",
            (&grade_level, &class_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(year) = optional_i64(req, "schoolYear") {
        if let Err(e) = conn.execute(
            "UPDATE classes SET school_year = ? WHERE id = ?",
            (year, &class_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_exists(conn, req, &class_id) {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM assessments
         WHERE report_id IN (
           SELECT r.id
           FROM reports r
           JOIN students s ON s.id = r.student_id
           WHERE s.class_id = ?
         )",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM reports
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "reports" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM class_teachers WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_teachers" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_assign_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_exists(conn, req, &class_id) {
        return e;
    }
    let teacher: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if teacher.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO class_teachers(class_id, teacher_id) VALUES(?, ?)",
        (&class_id, &teacher_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_unassign_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = conn.execute(
        "DELETE FROM class_teachers WHERE class_id = ? AND teacher_id = ?",
        (&class_id, &teacher_id),
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_exists(conn, req, &class_id) {
        return e;
    }
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let birth_date = optional_str(req, "birthDate");

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, full_name, birth_date) VALUES(?, ?, ?, ?)",
        (&student_id, &class_id, &full_name, &birth_date),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Some(full_name) = optional_str(req, "fullName") {
        if let Err(e) = conn.execute(
            "UPDATE students SET full_name = ? WHERE id = ?",
            (full_name.trim(), &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(birth_date) = optional_str(req, "birthDate") {
        if let Err(e) = conn.execute(
            "UPDATE students SET birth_date = ? WHERE id = ?",
            (&birth_date, &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(class_id) = optional_str(req, "classId") {
        if let Err(e) = class_exists(conn, req, &class_id) {
            return e;
        }
        if let Err(e) = conn.execute(
            "UPDATE students SET class_id = ? WHERE id = ?",
            (&class_id, &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM assessments
         WHERE report_id IN (SELECT id FROM reports WHERE student_id = ?)",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute("DELETE FROM reports WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Per-student progress for a requested period, which may be historical.
fn handle_classes_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let who = match requester(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_exists(conn, req, &class_id) {
        return e;
    }
    if let Err(e) = ensure_class_access(conn, req, &who, &class_id) {
        return e;
    }

    let period = match active_period(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let year = optional_i64(req, "year").unwrap_or(period.year);
    let trimester = optional_str(req, "trimester").unwrap_or_else(|| period.trimester.clone());
    if !workflow::is_valid_trimester(&trimester) {
        return err(
            &req.id,
            "bad_params",
            "trimester must be 1, 2 or 3",
            Some(json!({ "trimester": trimester })),
        );
    }
    let requested_is_active = period.matches(&trimester, year);

    let mut stmt = match conn.prepare(
        "SELECT id, full_name FROM students WHERE class_id = ? ORDER BY full_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([&class_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut roster = Vec::with_capacity(students.len());
    for (student_id, full_name) in students {
        let report: Option<(String, String)> = match conn
            .query_row(
                "SELECT id, status FROM reports
                 WHERE student_id = ? AND trimester = ? AND year = ?",
                (&student_id, &trimester, year),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let (report_id, status) = match report {
            Some((id, raw)) => (Some(id), ReportStatus::parse(&raw)),
            None => (None, None),
        };
        let live_percent = match &report_id {
            Some(id) => {
                let rows = match report_subject_rows(conn, req, id) {
                    Ok(v) => v,
                    Err(e) => return e,
                };
                workflow::completion_percent(&workflow::subject_completion(rows))
            }
            None => 0,
        };
        let (roster_status, progress) =
            workflow::roster_progress(status, live_percent, requested_is_active);

        roster.push(json!({
            "studentId": student_id,
            "fullName": full_name,
            "reportId": report_id,
            "status": roster_status.as_str(),
            "progress": progress,
        }));
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "year": year,
            "trimester": trimester,
            "requestedIsActive": requested_is_active,
            "students": roster,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.assignTeacher" => Some(handle_classes_assign_teacher(state, req)),
        "classes.unassignTeacher" => Some(handle_classes_unassign_teacher(state, req)),
        "classes.roster" => Some(handle_classes_roster(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
