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
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcard-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].as_str().is_some());
    assert!(health["workspacePath"].is_null());

    let no_ws = request(&mut stdin, &mut reader, "2", "grades.list", json!({ "schoolId": "x" }));
    assert_eq!(error_code(&no_ws), Some("no_workspace"));
    let no_ws_list = request(&mut stdin, &mut reader, "2b", "schools.list", json!({}));
    assert_eq!(error_code(&no_ws_list), Some("no_workspace"));
    let no_ws_setup = request(&mut stdin, &mut reader, "2c", "setup.get", json!({}));
    assert_eq!(error_code(&no_ws_setup), Some("no_workspace"));
    let no_ws_comments = request(&mut stdin, &mut reader, "2d", "report.comments.clear", json!({}));
    assert_eq!(error_code(&no_ws_comments), Some("no_workspace"));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("reportcard.sqlite3").exists());

    let school = request_ok(&mut stdin, &mut reader, "4", "schools.create", json!({ "name": "Smoke School" }));
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();
    let schools = request_ok(&mut stdin, &mut reader, "5", "schools.list", json!({}));
    assert_eq!(schools["schools"][0]["name"].as_str(), Some("Smoke School"));

    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.create",
        json!({ "schoolId": school_id, "name": "S1", "description": "Senior one" }),
    );
    let grade_id = grade["gradeId"].as_str().expect("gradeId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "gradeId": grade_id, "name": "Biology", "code": "BIO" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.assign",
        json!({ "subjectId": subject_id, "teacherName": "Mr. Ssali" }),
    );
    let subjects = request_ok(&mut stdin, &mut reader, "9", "subjects.list", json!({ "gradeId": grade_id }));
    assert_eq!(subjects["subjects"][0]["teacherName"].as_str(), Some("Mr. Ssali"));

    let grades = request_ok(&mut stdin, &mut reader, "10", "grades.list", json!({ "schoolId": school_id }));
    assert_eq!(grades["grades"][0]["description"].as_str(), Some("Senior one"));

    let term = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "terms.create",
        json!({ "schoolId": school_id, "name": "Term 3", "year": 2026 }),
    );
    let term_id = term["termId"].as_str().expect("termId").to_string();
    let terms = request_ok(&mut stdin, &mut reader, "12", "terms.list", json!({ "schoolId": school_id }));
    assert_eq!(terms["terms"][0]["year"].as_i64(), Some(2026));

    let bad_session = request(
        &mut stdin,
        &mut reader,
        "13",
        "sessions.create",
        json!({ "termId": term_id, "name": "Weekly", "sessionType": "WEEKLY" }),
    );
    assert_eq!(error_code(&bad_session), Some("bad_params"));
    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "sessions.create",
        json!({ "termId": term_id, "name": "Mid term", "sessionType": "MOT" }),
    );
    let sessions = request_ok(&mut stdin, &mut reader, "15", "sessions.list", json!({ "termId": term_id }));
    assert_eq!(sessions["sessions"][0]["sessionType"].as_str(), Some("MOT"));

    let bad_question = request(
        &mut stdin,
        &mut reader,
        "16",
        "questions.create",
        json!({ "gradeId": grade_id, "subjectId": subject_id, "maxScore": 0 }),
    );
    assert_eq!(error_code(&bad_question), Some("bad_params"));

    let orphan = request(
        &mut stdin,
        &mut reader,
        "17",
        "subjects.create",
        json!({ "gradeId": "missing", "name": "Chemistry" }),
    );
    assert_eq!(error_code(&orphan), Some("not_found"));

    request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "students.create",
        json!({
            "schoolId": school_id,
            "gradeId": grade_id,
            "registrationId": "S1-01",
            "firstName": "Joan",
            "lastName": "Nakato"
        }),
    );
    let duplicate = request(
        &mut stdin,
        &mut reader,
        "19",
        "students.create",
        json!({
            "schoolId": school_id,
            "gradeId": grade_id,
            "registrationId": "S1-01",
            "firstName": "Other",
            "lastName": "Student"
        }),
    );
    assert_eq!(error_code(&duplicate), Some("duplicate_registration"));

    let negative = request(
        &mut stdin,
        &mut reader,
        "20",
        "results.upsert",
        json!({ "studentId": "x", "questionId": "y", "score": -1 }),
    );
    assert_eq!(error_code(&negative), Some("bad_params"));

    let setup = request_ok(&mut stdin, &mut reader, "21", "setup.get", json!({}));
    assert!(setup.get("remarkTemplates").is_some());

    let unknown = request(&mut stdin, &mut reader, "22", "marks.compute", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(error_code(&value), Some("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].as_str().is_some());
}
