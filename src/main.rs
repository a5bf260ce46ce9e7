mod backup;
mod classify;
mod config;
mod dashboard;
mod db;
mod ipc;
mod normalize;
mod report_card;
mod reports;
mod schools_csv;
mod store;

use std::io::{self, BufRead, Write};

fn main() {
    let config = config::DaemonConfig::from_env();
    config::init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sabed starting");

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = config.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => tracing::warn!(workspace = %path.display(), error = %e, "workspace open failed"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "malformed request line");
                ipc::bad_json(&e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
