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

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("sabe-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_in = workspace.join("escolas.csv");
    std::fs::write(
        &csv_in,
        "id;inep;escola;endereco;bairro;distrito;gestor;telefone_extraido;localidade_id\n\
         102;29000102;Escola Beta;Rua B;Centro;;Ana;;1\n",
    )
    .expect("write csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let early = request(&mut stdin, &mut reader, "2", "dashboard.overview", json!({}));
    assert_eq!(error_code(&early), Some("no_workspace"));

    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("bad_json reply is json");
    assert_eq!(error_code(&bad), Some("bad_json"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "localities.create",
        json!({ "id": 1, "name": "Sede" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schools.upsert",
        json!({ "id": 101, "inep": "29000101", "name": "Escola Alfa", "localityId": 1 }),
    );
    let grade = request_ok(&mut stdin, &mut reader, "6", "grades.create", json!({ "name": "5º ano" }));
    let grade_id = grade
        .get("gradeId")
        .and_then(|v| v.as_str())
        .expect("gradeId")
        .to_string();
    let subject = request_ok(&mut stdin, &mut reader, "7", "subjects.create", json!({ "name": "LP" }));
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let upserted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "performance.upsert",
        json!({
            "schoolId": 101,
            "year": 2022,
            "subjectId": subject_id,
            "gradeId": grade_id,
            "studentsExpected": 40,
            "studentsAssessed": 36,
            "meanProficiency": 227.0,
            "belowBasic": 10, "basic": 20, "adequate": 40, "advanced": 30
        }),
    );
    let record_id = upserted
        .get("record")
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .expect("record id")
        .to_string();

    let calls = vec![
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "reports", "patch": { "evolutionYears": 3 } })),
        ("localities.list", json!({})),
        ("schools.list", json!({})),
        ("schools.get", json!({ "schoolId": 101 })),
        ("subjects.list", json!({})),
        ("grades.list", json!({})),
        ("performance.list", json!({ "schoolId": 101 })),
        (
            "targets.upsert",
            json!({
                "year": 2022, "subjectId": subject_id, "gradeId": grade_id,
                "targetProficiency": 220.0, "targetAdequateAdvancedPct": 60.0
            }),
        ),
        ("targets.list", json!({})),
        ("distribution.normalize", json!({ "belowBasic": 30, "basic": 30, "adequate": 30, "advanced": 30 })),
        ("proficiency.classify", json!({ "grade": "5º ano", "subject": "LP", "proficiency": 227.0 })),
        ("reports.schoolReportCard", json!({ "schoolId": 101 })),
        ("reports.schoolReportCardExport", json!({ "schoolId": 101 })),
        ("reports.performanceTable", json!({})),
        ("reports.participants", json!({})),
        ("dashboard.years", json!({})),
        ("dashboard.overview", json!({})),
        ("dashboard.schoolDetails", json!({ "schoolId": 101 })),
        ("dashboard.yearComparison", json!({})),
        (
            "dashboard.schoolComparison",
            json!({ "firstSchoolId": 101, "secondSchoolId": 102, "gradeId": grade_id }),
        ),
        ("dashboard.ranking", json!({})),
        ("dashboard.localityPanel", json!({})),
        ("dashboard.targetComparison", json!({})),
        ("exchange.importSchoolsCsv", json!({ "inPath": csv_in.to_string_lossy() })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
        ("performance.delete", json!({ "recordId": record_id })),
        ("schools.delete", json!({ "schoolId": 102 })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("c{}", i);
        let _ = request_ok(&mut stdin, &mut reader, &id, method, params);
    }

    let unknown = request(&mut stdin, &mut reader, "99", "grades.explode", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
