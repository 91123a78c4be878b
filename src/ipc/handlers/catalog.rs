use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, requester};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, Subject};
use rusqlite::OptionalExtension;
use serde_json::json;

fn competency_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "code": row.get::<_, String>(0)?,
        "subject": row.get::<_, String>(1)?,
        "gradeLevels": workflow::parse_grade_levels(&row.get::<_, String>(2)?),
        "skill": row.get::<_, String>(3)?,
        "thematicUnit": row.get::<_, String>(4)?,
        "knowledgeObjects": row.get::<_, String>(5)?,
        "relatedContent": row.get::<_, String>(6)?,
        "guidance": row.get::<_, String>(7)?,
        "saeb": row.get::<_, String>(8)?,
    }))
}

const COMPETENCY_COLUMNS: &str = "code, subject, grade_levels, skill, thematic_unit,
     knowledge_objects, related_content, guidance, saeb";

fn handle_competencies_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };
    if code.is_empty() {
        return err(&req.id, "bad_params", "code must not be empty", None);
    }
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(subject) = Subject::parse(&subject) else {
        return err(
            &req.id,
            "bad_params",
            "unknown subject",
            Some(json!({ "subject": subject })),
        );
    };
    let grade_levels_raw = match required_str(req, "gradeLevels") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_levels = workflow::parse_grade_levels(&grade_levels_raw);
    if grade_levels.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "gradeLevels must name at least one grade",
            None,
        );
    }
    if let Some(bad) = grade_levels.iter().find(|g| !workflow::is_grade_level(g)) {
        return err(
            &req.id,
            "bad_params",
            "unknown grade level",
            Some(json!({ "gradeLevel": bad })),
        );
    }
    let skill = match required_str(req, "skill") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let thematic_unit = optional_str(req, "thematicUnit").unwrap_or_default();
    let knowledge_objects = optional_str(req, "knowledgeObjects").unwrap_or_default();
    let related_content = optional_str(req, "relatedContent").unwrap_or_default();
    let guidance = optional_str(req, "guidance").unwrap_or_default();
    let saeb = optional_str(req, "saeb").unwrap_or_default();

    if let Err(e) = conn.execute(
        "INSERT INTO competencies(code, subject, grade_levels, skill, thematic_unit,
             knowledge_objects, related_content, guidance, saeb)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
           subject = excluded.subject,
           grade_levels = excluded.grade_levels,
           skill = excluded.skill,
           thematic_unit = excluded.thematic_unit,
           knowledge_objects = excluded.knowledge_objects,
           related_content = excluded.related_content,
           guidance = excluded.guidance,
           saeb = excluded.saeb",
        (
            &code,
            subject.as_str(),
            grade_levels.join(", "),
            &skill,
            &thematic_unit,
            &knowledge_objects,
            &related_content,
            &guidance,
            &saeb,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "code": code }))
}

fn handle_competencies_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject = match optional_str(req, "subject") {
        Some(raw) => match Subject::parse(&raw) {
            Some(s) => Some(s),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "unknown subject",
                    Some(json!({ "subject": raw })),
                )
            }
        },
        None => None,
    };
    let grade_level = optional_str(req, "gradeLevel").map(|g| g.trim().to_ascii_uppercase());

    let sql = format!(
        "SELECT {} FROM competencies {} ORDER BY code",
        COMPETENCY_COLUMNS,
        if subject.is_some() {
            "WHERE subject = ?"
        } else {
            ""
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row<'_>| {
        let raw_grades: String = row.get(2)?;
        Ok((competency_json(row)?, raw_grades))
    };
    let rows = match subject {
        Some(s) => stmt
            .query_map([s.as_str()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Grade filtering happens on the parsed set; the column is comma-joined
    // text, so SQL LIKE would confuse 1EF with 21EF-style codes.
    let competencies: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, raw)| match &grade_level {
            Some(g) => workflow::applies_to_grade(raw, g),
            None => true,
        })
        .map(|(v, _)| v)
        .collect();

    ok(&req.id, json!({ "competencies": competencies }))
}

fn handle_competencies_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };

    let sql = format!("SELECT {} FROM competencies WHERE code = ?", COMPETENCY_COLUMNS);
    match conn.query_row(&sql, [&code], competency_json).optional() {
        Ok(Some(c)) => ok(&req.id, json!({ "competency": c })),
        Ok(None) => err(&req.id, "not_found", "competency not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_competencies_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e,
    };

    // Catalog rows are shared reference data: once any assessment points at
    // one, it must stay.
    let referenced: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM assessments WHERE competency_code = ?",
        [&code],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referenced > 0 {
        return err(
            &req.id,
            "in_use",
            "competency is referenced by assessments",
            Some(json!({ "assessmentCount": referenced })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM suggestions WHERE competency_code = ?", [&code]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let deleted = match tx.execute("DELETE FROM competencies WHERE code = ?", [&code]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "competency not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "competencies.upsert" => Some(handle_competencies_upsert(state, req)),
        "competencies.list" => Some(handle_competencies_list(state, req)),
        "competencies.get" => Some(handle_competencies_get(state, req)),
        "competencies.delete" => Some(handle_competencies_delete(state, req)),
        _ => None,
    }
}
