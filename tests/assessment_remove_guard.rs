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
    teacher: String,
    report_id: String,
}

fn seed_report(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> School {
    let workspace = temp_dir("trilha-remove");
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
    let report_id = request_ok(
        stdin,
        reader,
        "s7",
        "reports.open",
        json!({ "requesterId": teacher, "studentId": student }),
    )["report"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    School { teacher, report_id }
}

#[test]
fn graded_assessment_cannot_be_removed() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_report(&mut stdin, &mut reader);

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "competencyCode": "EF03MA01"
        }),
    )["assessmentId"]
        .as_str()
        .unwrap()
        .to_string();
    let ungraded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "competencyCode": "EF03MA02"
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
            "reportId": school.report_id,
            "subject": "MAT",
            "grades": [{ "competencyCode": "EF03MA01", "level": 4 }]
        }),
    );

    let refused = request(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.remove",
        json!({ "requesterId": school.teacher, "assessmentId": graded }),
    );
    assert_eq!(refused["ok"], false);
    assert_eq!(refused["error"]["code"], "has_grade");

    // The ungraded row goes without complaint.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.remove",
        json!({ "requesterId": school.teacher, "assessmentId": ungraded }),
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.get",
        json!({ "requesterId": school.teacher, "reportId": school.report_id }),
    );
    let assessments = fetched["assessments"].as_array().unwrap();
    assert_eq!(assessments.len(), 1);
    assert_eq!(assessments[0]["competencyCode"], "EF03MA01");
}

#[test]
fn clear_subject_removes_graded_rows_too() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_report(&mut stdin, &mut reader);

    for (i, code) in ["EF03MA01", "EF03MA02"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "assessments.add",
            json!({
                "requesterId": school.teacher,
                "reportId": school.report_id,
                "competencyCode": code
            }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.saveGrades",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "subject": "MAT",
            "grades": [
                { "competencyCode": "EF03MA01", "level": 4 },
                { "competencyCode": "EF03MA02", "level": 2 }
            ]
        }),
    );

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.clearSubject",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "subject": "MAT"
        }),
    );
    assert_eq!(cleared["deleted"], 2);

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.get",
        json!({ "requesterId": school.teacher, "reportId": school.report_id }),
    );
    assert!(fetched["assessments"].as_array().unwrap().is_empty());
}

#[test]
fn save_grades_is_all_or_nothing() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_report(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "competencyCode": "EF03MA01"
        }),
    );

    // Second entry targets a competency that was never attached; the whole
    // batch must roll back.
    let failed = request(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.saveGrades",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "subject": "MAT",
            "grades": [
                { "competencyCode": "EF03MA01", "level": 5 },
                { "competencyCode": "EF03MA02", "level": 1 }
            ]
        }),
    );
    assert_eq!(failed["ok"], false);
    assert_eq!(failed["error"]["code"], "not_found");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.get",
        json!({ "requesterId": school.teacher, "reportId": school.report_id }),
    );
    let assessments = fetched["assessments"].as_array().unwrap();
    assert_eq!(assessments.len(), 1);
    assert!(assessments[0]["level"].is_null());
}

#[test]
fn out_of_range_level_is_refused() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_report(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.add",
        json!({
            "requesterId": school.teacher,
            "reportId": school.report_id,
            "competencyCode": "EF03MA01"
        }),
    );

    for (id, level) in [("2", 0), ("3", 6)] {
        let refused = request(
            &mut stdin,
            &mut reader,
            id,
            "assessments.saveGrades",
            json!({
                "requesterId": school.teacher,
                "reportId": school.report_id,
                "subject": "MAT",
                "grades": [{ "competencyCode": "EF03MA01", "level": level }]
            }),
        );
        assert_eq!(refused["ok"], false);
        assert_eq!(refused["error"]["code"], "bad_params");
    }
}
