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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(v: &serde_json::Value) -> Option<&str> {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_out = workspace.join("smoke-report.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "studentNumber": "2024-0001",
            "firstName": "Ana",
            "lastName": "Santos",
            "course": "BSCS",
            "yearLevel": 2
        }),
    );
    let student_id = student["result"]["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let subject = request(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "subjectCode": "CS101", "subjectName": "Intro", "instructor": "Reyes" }),
    );
    let subject_id = subject["result"]["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let grade = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.create",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "prelim": 85, "midterm": 85, "semifinal": 85, "final": 85
        }),
    );
    let grade_id = grade["result"]["gradeId"]
        .as_str()
        .expect("gradeId")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "6", "students.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "7", "subjects.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "8", "grades.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "grades.get",
        json!({ "gradeId": grade_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "grades.compute",
        json!({ "prelim": 90, "midterm": 90, "semifinal": 90, "final": 90 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "grades.exportCsv",
        json!({ "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "grades.delete",
        json!({ "gradeId": grade_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "students.delete",
        json!({ "studentId": student_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_method_and_bad_json_get_error_envelopes() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{}", json!({ "id": "u1", "method": "classes.list", "params": {} }))
        .expect("write request");
    stdin.flush().expect("flush");
    let unknown = read_response(&mut reader);
    assert_eq!(unknown["id"], "u1");
    assert_eq!(unknown["ok"], false);
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let bad = read_response(&mut reader);
    assert_eq!(bad["ok"], false);
    assert_eq!(error_code(&bad), Some("bad_json"));

    // The loop keeps serving after a malformed line.
    let health = request(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["ok"], true);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn lists_are_empty_and_writes_fail_without_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    for (i, (method, key)) in [
        ("students.list", "students"),
        ("subjects.list", "subjects"),
        ("grades.list", "grades"),
    ]
    .iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("l{i}"), method, json!({}));
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["result"][key], json!([]));
    }

    let create = request(
        &mut stdin,
        &mut reader,
        "c1",
        "subjects.create",
        json!({ "subjectCode": "X", "subjectName": "Y", "instructor": "Z" }),
    );
    assert_eq!(create["ok"], false);
    assert_eq!(error_code(&create), Some("no_workspace"));

    // Preview math needs no workspace.
    let compute = request(
        &mut stdin,
        &mut reader,
        "c2",
        "grades.compute",
        json!({ "prelim": 80, "midterm": 80, "semifinal": 80, "final": 80 }),
    );
    assert_eq!(compute["ok"], true);
    assert_eq!(compute["result"]["finalGrade"], 80.0);
    assert_eq!(compute["result"]["tier"], "good");

    let select = request(&mut stdin, &mut reader, "c3", "workspace.select", json!({}));
    assert_eq!(error_code(&select), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn rejected_import_keeps_workspace_records() {
    let workspace = temp_dir("gradebook-router-import");
    let notes = workspace.join("notes.txt");
    std::fs::write(&notes, "hello, this is not sqlite").expect("write notes");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "subjectCode": "KEEP", "subjectName": "Keep me", "instructor": "Reyes" }),
    );

    let import = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({ "inPath": notes.to_string_lossy() }),
    );
    assert_eq!(import["ok"], false);
    assert_eq!(error_code(&import), Some("bad_bundle"));

    let listed = request(&mut stdin, &mut reader, "4", "subjects.list", json!({}));
    assert_eq!(listed["ok"], true);
    let subjects = listed["result"]["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["subjectCode"], "KEEP");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
