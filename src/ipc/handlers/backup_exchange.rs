use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{no_workspace, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schools_csv;
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return no_workspace(req);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return no_workspace(req);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // The old database is still in place when the bundle is rejected.
            if let Some(ws) = state.workspace.clone() {
                state.db = db::open_db(&ws).ok();
            }
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

fn handle_exchange_import_schools_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(req);
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let text = match std::fs::read_to_string(&in_path) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            )
        }
    };
    match schools_csv::import_schools(conn, &text) {
        Ok(summary) => ok(&req.id, json!({ "ok": true, "path": in_path, "summary": summary })),
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        "exchange.importSchoolsCsv" => Some(handle_exchange_import_schools_csv(state, req)),
        _ => None,
    }
}
