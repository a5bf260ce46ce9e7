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

const ROSTER: &str = "\u{feff}id;inep;escola;endereco;bairro;distrito;gestor;telefone_extraido;localidade_id
1;29000001;Escola Municipal Centro;Rua A, 10;Centro;Sede;Maria;(75) 3333-0000;1
2;29000002;\"Escola Rural; Anexo\";;;Limoeiro;;;7
3;29000003;;Rua C;;;;;1
x4;29000004;Escola Sem Id;;;;;;1
5;;Escola Sem Inep;;;;;;1
6;29000001;Escola Duplicada;;;;;;1
";

#[test]
fn schools_csv_import_reports_counts_and_warnings() {
    let workspace = temp_dir("sabe-schools-csv");
    let csv_path = workspace.join("escolas.csv");
    std::fs::write(&csv_path, ROSTER).expect("write csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "localities.create", json!({ "id": 1, "name": "Sede" }));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.importSchoolsCsv",
        json!({ "inPath": csv_path.to_string_lossy() }),
    );
    let summary = &imported["summary"];
    assert_eq!(summary["total"], 6);
    assert_eq!(summary["inserted"], 2);
    assert_eq!(summary["updated"], 0);
    assert_eq!(summary["skipped"], 4);
    assert_eq!(summary["localitiesCreated"], 1);
    let codes: Vec<&str> = summary["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["missing_name", "bad_id", "missing_inep", "duplicate_inep"]);

    let school = request_ok(&mut stdin, &mut reader, "4", "schools.get", json!({ "schoolId": 1 }));
    assert_eq!(school["school"]["district"], "Centro/Sede");
    assert_eq!(school["school"]["localityName"], "Sede");
    let rural = request_ok(&mut stdin, &mut reader, "5", "schools.get", json!({ "schoolId": 2 }));
    assert_eq!(rural["school"]["name"], "Escola Rural; Anexo");
    assert_eq!(rural["school"]["district"], "Limoeiro");
    assert_eq!(rural["school"]["localityName"], "Localidade 7");

    // Same file again updates in place.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exchange.importSchoolsCsv",
        json!({ "inPath": csv_path.to_string_lossy() }),
    );
    assert_eq!(again["summary"]["inserted"], 0);
    assert_eq!(again["summary"]["updated"], 2);
    assert_eq!(again["summary"]["localitiesCreated"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn schools_csv_import_rejects_missing_columns() {
    let workspace = temp_dir("sabe-schools-csv-bad");
    let csv_path = workspace.join("escolas.csv");
    std::fs::write(&csv_path, "id;escola\n1;Escola\n").expect("write csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "exchange.importSchoolsCsv",
        json!({ "inPath": csv_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.importSchoolsCsv",
        json!({ "inPath": workspace.join("nope.csv").to_string_lossy() }),
    );
    assert_eq!(error_code(&missing), Some("io_failed"));

    let listed = request_ok(&mut stdin, &mut reader, "4", "schools.list", json!({}));
    assert_eq!(listed["schools"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
