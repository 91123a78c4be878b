use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("trilha.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            school_year INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_teachers(
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            PRIMARY KEY(class_id, teacher_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_teachers_teacher ON class_teachers(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            birth_date TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS competencies(
            code TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            grade_levels TEXT NOT NULL,
            skill TEXT NOT NULL,
            thematic_unit TEXT NOT NULL DEFAULT '',
            knowledge_objects TEXT NOT NULL DEFAULT '',
            related_content TEXT NOT NULL DEFAULT '',
            guidance TEXT NOT NULL DEFAULT '',
            saeb TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_competencies_subject ON competencies(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            trimester TEXT NOT NULL,
            year INTEGER NOT NULL,
            status TEXT NOT NULL,
            feedback TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            UNIQUE(student_id, trimester, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_student ON reports(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_teacher ON reports(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            report_id TEXT NOT NULL,
            competency_code TEXT NOT NULL,
            level INTEGER,
            note TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(report_id) REFERENCES reports(id),
            FOREIGN KEY(competency_code) REFERENCES competencies(code),
            UNIQUE(report_id, competency_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_report ON assessments(report_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_competency ON assessments(competency_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS suggestions(
            id TEXT PRIMARY KEY,
            competency_code TEXT NOT NULL,
            author_id TEXT,
            target_level INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            FOREIGN KEY(competency_code) REFERENCES competencies(code),
            FOREIGN KEY(author_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_suggestions_match
         ON suggestions(competency_code, target_level, status)",
        [],
    )?;

    // Singleton: exactly one row, updated in place, never deleted.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_period(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            year INTEGER NOT NULL,
            trimester TEXT NOT NULL,
            window_start TEXT,
            window_end TEXT
        )",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO system_period(id, year, trimester) VALUES(1, 2025, '1')",
        [],
    )?;

    // Workspaces imported from the original system carry mixed Portuguese
    // status spellings; rewrite them to the canonical vocabulary.
    migrate_legacy_statuses(&conn)?;

    Ok(conn)
}

fn migrate_legacy_statuses(conn: &Connection) -> anyhow::Result<()> {
    // Report workflow statuses. AGUARDANDO and ANALISE were two spellings of
    // the same submitted-for-review state.
    for (legacy, canonical) in [
        ("RASCUNHO", "draft"),
        ("AGUARDANDO", "under_review"),
        ("ANALISE", "under_review"),
        ("APROVADO", "approved"),
        ("CORRECAO", "returned"),
    ] {
        conn.execute(
            "UPDATE reports SET status = ? WHERE status = ?",
            (canonical, legacy),
        )?;
    }

    // Suggestion moderation statuses, including the gender-variant spellings.
    for (legacy, canonical) in [
        ("PENDENTE", "pending"),
        ("AGUARDANDO", "pending"),
        ("APROVADO", "approved"),
        ("APROVADA", "approved"),
        ("REJEITADO", "rejected"),
        ("REJEITADA", "rejected"),
    ] {
        conn.execute(
            "UPDATE suggestions SET status = ? WHERE status = ?",
            (canonical, legacy),
        )?;
    }

    // Legacy role strings collapse into the two-role model.
    for (legacy, canonical) in [
        ("PROFESSOR", "teacher"),
        ("ADMINISTRADOR", "coordinator"),
        ("COORDENADOR", "coordinator"),
    ] {
        conn.execute(
            "UPDATE users SET role = ? WHERE role = ?",
            (canonical, legacy),
        )?;
    }

    Ok(())
}
