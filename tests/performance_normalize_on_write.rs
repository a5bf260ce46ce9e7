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
    let exe = env!("CARGO_BIN_EXE_sabed");
    let mut child = Command::new(exe)
        .env_remove("SABED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sabed");
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

struct Fixture {
    grade_id: String,
    subject_id: String,
}

fn seed_catalog(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let _ = request_ok(stdin, reader, "s1", "localities.create", json!({ "id": 1, "name": "Sede" }));
    let _ = request_ok(
        stdin,
        reader,
        "s2",
        "schools.upsert",
        json!({ "id": 7, "inep": "29000007", "name": "Escola Sete", "localityId": 1 }),
    );
    let grade = request_ok(stdin, reader, "s3", "grades.create", json!({ "name": "9º ano" }));
    let subject = request_ok(stdin, reader, "s4", "subjects.create", json!({ "name": "MT" }));
    Fixture {
        grade_id: grade["gradeId"].as_str().expect("gradeId").to_string(),
        subject_id: subject["subjectId"].as_str().expect("subjectId").to_string(),
    }
}

fn band(record: &serde_json::Value, key: &str) -> f64 {
    record.get(key).and_then(|v| v.as_f64()).expect(key)
}

#[test]
fn upsert_normalizes_distribution_and_is_idempotent() {
    let workspace = temp_dir("sabe-normalize-on-write");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_catalog(&mut stdin, &mut reader);

    let params = json!({
        "schoolId": 7,
        "year": 2022,
        "subjectId": fx.subject_id,
        "gradeId": fx.grade_id,
        "studentsExpected": 50,
        "studentsAssessed": 45,
        "meanProficiency": 263.0,
        "belowBasic": 30, "basic": 30, "adequate": 30, "advanced": 30
    });
    let first = request_ok(&mut stdin, &mut reader, "2", "performance.upsert", params.clone());
    let rec = &first["record"];
    for key in ["belowBasic", "basic", "adequate", "advanced"] {
        assert_eq!(band(rec, key), 25.0, "{}", key);
    }
    assert_eq!(band(rec, "participationRate"), 90.0);
    assert_eq!(band(rec, "assessedPct"), 90.0);
    assert!(rec["updatedAt"].as_str().map(|s| !s.is_empty()).unwrap_or(false));
    let id = rec["id"].as_str().expect("id").to_string();

    // Saving the stored values again changes nothing and keeps the identity.
    let mut again = params.clone();
    again["belowBasic"] = rec["belowBasic"].clone();
    again["basic"] = rec["basic"].clone();
    again["adequate"] = rec["adequate"].clone();
    again["advanced"] = rec["advanced"].clone();
    let second = request_ok(&mut stdin, &mut reader, "3", "performance.upsert", again);
    assert_eq!(second["record"]["id"].as_str(), Some(id.as_str()));
    for key in ["belowBasic", "basic", "adequate", "advanced"] {
        assert_eq!(band(&second["record"], key), 25.0, "{}", key);
    }

    let listed = request_ok(&mut stdin, &mut reader, "4", "performance.list", json!({ "schoolId": 7 }));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "performance.upsert",
        json!({
            "schoolId": 7,
            "year": 2021,
            "subjectId": fx.subject_id,
            "gradeId": fx.grade_id,
            "studentsExpected": 0,
            "studentsAssessed": 0,
            "meanProficiency": 0.0
        }),
    );
    let zero = request_ok(&mut stdin, &mut reader, "6", "performance.list", json!({ "year": 2021 }));
    let zero_rec = &zero["records"][0];
    for key in ["belowBasic", "basic", "adequate", "advanced", "participationRate"] {
        assert_eq!(band(zero_rec, key), 0.0, "{}", key);
    }

    // A negative band total is stored as given, not sign-flipped.
    let negative = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "performance.upsert",
        json!({
            "schoolId": 7,
            "year": 2020,
            "subjectId": fx.subject_id,
            "gradeId": fx.grade_id,
            "studentsExpected": 20,
            "studentsAssessed": 20,
            "meanProficiency": 250.0,
            "belowBasic": -10.0, "basic": 0.0, "adequate": 0.0, "advanced": 5.0
        }),
    );
    let neg = &negative["record"];
    assert_eq!(band(neg, "belowBasic"), -10.0);
    assert_eq!(band(neg, "basic"), 0.0);
    assert_eq!(band(neg, "adequate"), 0.0);
    assert_eq!(band(neg, "advanced"), 5.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn upsert_rejects_unknown_references() {
    let workspace = temp_dir("sabe-normalize-refs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_catalog(&mut stdin, &mut reader);

    let missing_school = request(
        &mut stdin,
        &mut reader,
        "2",
        "performance.upsert",
        json!({
            "schoolId": 999,
            "year": 2022,
            "subjectId": fx.subject_id,
            "gradeId": fx.grade_id,
            "studentsExpected": 10,
            "studentsAssessed": 10,
            "meanProficiency": 200.0
        }),
    );
    assert_eq!(error_code(&missing_school), Some("not_found"));

    let malformed = request(
        &mut stdin,
        &mut reader,
        "3",
        "performance.upsert",
        json!({ "schoolId": 7, "year": "2022" }),
    );
    assert_eq!(error_code(&malformed), Some("bad_params"));

    let negative = request(
        &mut stdin,
        &mut reader,
        "4",
        "performance.upsert",
        json!({
            "schoolId": 7,
            "year": 2022,
            "subjectId": fx.subject_id,
            "gradeId": fx.grade_id,
            "studentsExpected": -1,
            "studentsAssessed": 0,
            "meanProficiency": 200.0
        }),
    );
    assert_eq!(error_code(&negative), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
