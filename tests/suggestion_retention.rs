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
}

fn seed_school(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> School {
    let workspace = temp_dir("trilha-retention");
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
    request_ok(
        stdin,
        reader,
        "s4",
        "competencies.upsert",
        json!({
            "requesterId": coordinator,
            "code": "EF03MA01",
            "subject": "MAT",
            "gradeLevels": "3EF",
            "skill": "Ler e comparar números naturais."
        }),
    );

    School {
        coordinator,
        teacher,
    }
}

fn create_rejected(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    school: &School,
    tag: &str,
    submitted_at: &str,
) -> String {
    let id = request_ok(
        stdin,
        reader,
        &format!("cr-{}", tag),
        "suggestions.create",
        json!({
            "requesterId": school.teacher,
            "competencyCode": "EF03MA01",
            "targetLevel": 2,
            "title": format!("Atividade {}", tag),
            "now": submitted_at
        }),
    )["suggestionId"]
        .as_str()
        .unwrap()
        .to_string();
    request_ok(
        stdin,
        reader,
        &format!("rj-{}", tag),
        "suggestions.moderate",
        json!({
            "requesterId": school.coordinator,
            "suggestionId": id,
            "decision": "reject"
        }),
    );
    id
}

#[test]
fn sweep_drops_only_expired_rejections() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    // 40 days old: past the 30-day retention window.
    let expired = create_rejected(
        &mut stdin,
        &mut reader,
        &school,
        "velha",
        "2025-03-01T09:00:00Z",
    );
    // 10 days old: still within retention.
    let recent = create_rejected(
        &mut stdin,
        &mut reader,
        &school,
        "recente",
        "2025-03-31T09:00:00Z",
    );
    // Old but still pending: retention only applies to rejections.
    let old_pending = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "suggestions.create",
        json!({
            "requesterId": school.teacher,
            "competencyCode": "EF03MA01",
            "targetLevel": 4,
            "title": "Atividade esquecida",
            "now": "2025-01-15T09:00:00Z"
        }),
    )["suggestionId"]
        .as_str()
        .unwrap()
        .to_string();

    let swept = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "suggestions.sweep",
        json!({ "now": "2025-04-10T09:00:00Z" }),
    );
    assert_eq!(swept["deletedCount"], 1);

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "suggestions.list",
        json!({ "requesterId": school.coordinator }),
    );
    let ids: Vec<&str> = all["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(!ids.contains(&expired.as_str()));
    assert!(ids.contains(&recent.as_str()));
    assert!(ids.contains(&old_pending.as_str()));

    // Re-running finds nothing new to delete.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "suggestions.sweep",
        json!({ "now": "2025-04-10T09:00:00Z" }),
    );
    assert_eq!(again["deletedCount"], 0);
}

#[test]
fn rejection_at_exactly_thirty_days_is_swept() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    create_rejected(
        &mut stdin,
        &mut reader,
        &school,
        "limite",
        "2025-03-01T09:00:00Z",
    );

    let swept = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "suggestions.sweep",
        json!({ "now": "2025-03-31T09:00:00Z" }),
    );
    assert_eq!(swept["deletedCount"], 1);
}
