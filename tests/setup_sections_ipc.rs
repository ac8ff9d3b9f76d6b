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
fn setup_get_update_roundtrip_and_validation() {
    let workspace = temp_dir("reportcard-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert!(defaults["school"]["activeSchoolId"].is_null());
    assert_eq!(defaults["grading"]["englishMathDowngrade"].as_bool(), Some(false));
    assert_eq!(defaults["comments"]["autoFillOnOpen"].as_bool(), Some(true));
    assert!(!defaults["remarkTemplates"]["subject"]["excellent"]
        .as_array()
        .expect("excellent pool")
        .is_empty());

    let unknown_school = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "school", "patch": { "activeSchoolId": "nope" } }),
    );
    assert_eq!(error_code(&unknown_school), Some("not_found"));

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "grading", "patch": { "englishMathDowngrade": "yes" } }),
    );
    assert_eq!(error_code(&bad_type), Some("bad_params"));

    let bad_section = request(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "printing", "patch": {} }),
    );
    assert_eq!(error_code(&bad_section), Some("bad_params"));

    let empty_pool = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "remarkTemplates", "patch": { "subject": { "poor": [] } } }),
    );
    assert_eq!(error_code(&empty_pool), Some("bad_params"));

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({
            "section": "remarkTemplates",
            "patch": { "headTeacher": { "excellent": ["Top of the class at {pct}%."] } }
        }),
    );
    let after = request_ok(&mut stdin, &mut reader, "8", "setup.get", json!({}));
    assert_eq!(
        after["remarkTemplates"]["headTeacher"]["excellent"],
        json!(["Top of the class at {pct}%."])
    );
    // Untouched pools keep their defaults.
    assert_eq!(
        after["remarkTemplates"]["subject"],
        defaults["remarkTemplates"]["subject"]
    );
}

#[test]
fn custom_templates_drive_remarks() {
    let workspace = temp_dir("reportcard-setup-templates");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(&mut stdin, &mut reader, "2", "schools.create", json!({ "name": "Lakeview" }));
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.create",
        json!({ "schoolId": school_id, "name": "P5" }),
    );
    let grade_id = grade["gradeId"].as_str().expect("gradeId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "gradeId": grade_id, "name": "Science" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();
    let term = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "terms.create",
        json!({ "schoolId": school_id, "name": "Term 1" }),
    );
    let term_id = term["termId"].as_str().expect("termId").to_string();
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.create",
        json!({ "termId": term_id, "name": "EOT", "sessionType": "EOT" }),
    );
    let session_id = session["examSessionId"].as_str().expect("examSessionId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({
            "schoolId": school_id,
            "gradeId": grade_id,
            "registrationId": "P5-7",
            "firstName": "Grace",
            "lastName": "Auma"
        }),
    );
    let question = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.create",
        json!({ "gradeId": grade_id, "subjectId": subject_id, "examSessionId": session_id, "maxScore": 20 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "results.upsert",
        json!({
            "studentId": student["studentId"],
            "questionId": question["questionId"],
            "examSessionId": session_id,
            "score": 19
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "setup.update",
        json!({
            "section": "remarkTemplates",
            "patch": { "subject": { "excellent": ["{subject}: {pct}% exactly."] } }
        }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "report.open",
        json!({
            "schoolId": school_id,
            "gradeId": grade_id,
            "termId": term_id,
            "registrationId": "P5-7"
        }),
    );
    assert_eq!(
        opened["comments"]["subjectComments"][&subject_id].as_str(),
        Some("Science: 95% exactly.")
    );
}
