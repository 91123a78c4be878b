use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_trilhad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trilhad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct School {
    coordinator: String,
    teacher: String,
    student: String,
}

fn seed_school(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> School {
    let workspace = temp_dir("trilha-lock");
    request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let coordinator = request_ok(
        stdin,
        reader,
        "s2",
        "users.create",
        json!({ "username": "coord", "displayName": "Coordenação", "role": "coordinator" }),
    )["userId"]
        .as_str()
        .unwrap()
        .to_string();
    let teacher = request_ok(
        stdin,
        reader,
        "s3",
        "users.create",
        json!({
            "requesterId": coordinator,
            "username": "eduardo",
            "displayName": "Eduardo",
            "role": "teacher"
        }),
    )["userId"]
        .as_str()
        .unwrap()
        .to_string();
    let class_id = request_ok(
        stdin,
        reader,
        "s4",
        "classes.create",
        json!({
            "requesterId": coordinator,
            "name": "3º Ano A",
            "gradeLevel": "3EF",
            "schoolYear": 2025
        }),
    )["classId"]
        .as_str()
        .unwrap()
        .to_string();
    request_ok(
        stdin,
        reader,
        "s5",
        "classes.assignTeacher",
        json!({ "requesterId": coordinator, "classId": class_id, "teacherId": teacher }),
    );
    let student = request_ok(
        stdin,
        reader,
        "s6",
        "students.create",
        json!({ "requesterId": coordinator, "classId": class_id, "fullName": "Ana Souza" }),
    )["studentId"]
        .as_str()
        .unwrap()
        .to_string();
    for (i, code) in ["EF03MA01", "EF03MA02"].iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("c{}", i),
            "competencies.upsert",
            json!({
                "requesterId": coordinator,
                "code": code,
                "subject": "MAT",
                "gradeLevels": "3EF",
                "skill": "Resolver problemas com números naturais."
            }),
        );
    }

    School {
        coordinator,
        teacher,
        student,
    }
}

#[test]
fn submitted_report_rejects_all_mutations() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    let report_id = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.open",
        json!({ "requesterId": school.teacher, "studentId": school.student }),
    )["report"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let assessment_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "competencyCode": "EF03MA01"
        }),
    )["assessmentId"]
        .as_str()
        .unwrap()
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.saveGrades",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "subject": "MAT",
            "grades": [{ "competencyCode": "EF03MA01", "level": 3, "note": "Ok." }]
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.submit",
        json!({ "requesterId": school.teacher, "reportId": report_id }),
    );

    for (id, method, params) in [
        (
            "5",
            "assessments.add",
            json!({
                "requesterId": school.teacher,
                "reportId": report_id,
                "competencyCode": "EF03MA02"
            }),
        ),
        (
            "6",
            "assessments.saveGrades",
            json!({
                "requesterId": school.teacher,
                "reportId": report_id,
                "subject": "MAT",
                "grades": [{ "competencyCode": "EF03MA01", "level": 5 }]
            }),
        ),
        (
            "7",
            "assessments.remove",
            json!({ "requesterId": school.teacher, "assessmentId": assessment_id }),
        ),
        (
            "8",
            "assessments.clearSubject",
            json!({ "requesterId": school.teacher, "reportId": report_id, "subject": "MAT" }),
        ),
    ] {
        let refused = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(refused["ok"], false, "{} should be refused", method);
        assert_eq!(refused["error"]["code"], "report_locked", "{}", method);
    }

    // Nothing leaked through.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.get",
        json!({ "requesterId": school.teacher, "reportId": report_id }),
    );
    let assessments = fetched["assessments"].as_array().unwrap();
    assert_eq!(assessments.len(), 1);
    assert_eq!(assessments[0]["level"], 3);
    assert_eq!(assessments[0]["note"], "Ok.");
}

#[test]
fn closed_editing_window_locks_drafts() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    let report_id = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.open",
        json!({ "requesterId": school.teacher, "studentId": school.student }),
    )["report"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "period.set",
        json!({
            "requesterId": school.coordinator,
            "windowStart": "2025-03-01",
            "windowEnd": "2025-03-31"
        }),
    );

    let late = request(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "competencyCode": "EF03MA01",
            "now": "2025-04-05T10:00:00Z"
        }),
    );
    assert_eq!(late["ok"], false);
    assert_eq!(late["error"]["code"], "report_locked");

    let early = request(
        &mut stdin,
        &mut reader,
        "4",
        "reports.submit",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "now": "2025-02-20T10:00:00Z"
        }),
    );
    assert_eq!(early["ok"], false);
    assert_eq!(early["error"]["code"], "report_locked");

    // Inside the window everything works.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "competencyCode": "EF03MA01",
            "now": "2025-03-15T10:00:00Z"
        }),
    );
}

#[test]
fn duplicate_report_and_assessment_are_refused() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.create",
        json!({ "requesterId": school.teacher, "studentId": school.student }),
    );
    let dup_report = request(
        &mut stdin,
        &mut reader,
        "2",
        "reports.create",
        json!({ "requesterId": school.teacher, "studentId": school.student }),
    );
    assert_eq!(dup_report["ok"], false);
    assert_eq!(dup_report["error"]["code"], "duplicate");

    let report_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.open",
        json!({ "requesterId": school.teacher, "studentId": school.student }),
    )["report"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "competencyCode": "EF03MA01"
        }),
    );
    let dup_assessment = request(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": report_id,
            "competencyCode": "EF03MA01"
        }),
    );
    assert_eq!(dup_assessment["ok"], false);
    assert_eq!(dup_assessment["error"]["code"], "duplicate");
}
