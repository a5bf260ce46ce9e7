use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{no_workspace, optional_i64, params_as, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, PerformanceInput, RecordFilters, TargetInput};
use serde_json::json;

fn handle_performance_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let input: PerformanceInput = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::upsert_performance(conn, &input) {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_performance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "records": [] }));
    };
    let filters: RecordFilters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::list_performances(conn, &filters) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_performance_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::delete_performance(conn, &id) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "performance record not found", None),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_targets_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let input: TargetInput = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !(0.0..=100.0).contains(&input.target_adequate_advanced_pct) {
        return err(
            &req.id,
            "bad_params",
            "targetAdequateAdvancedPct must be in 0..=100",
            None,
        );
    }
    match store::upsert_target(conn, &input) {
        Ok(id) => ok(&req.id, json!({ "targetId": id })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_targets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "targets": [] }));
    };
    let year = match optional_i64(req, "year") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::list_targets(conn, year) {
        Ok(targets) => ok(&req.id, json!({ "targets": targets })),
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "performance.upsert" => Some(handle_performance_upsert(state, req)),
        "performance.list" => Some(handle_performance_list(state, req)),
        "performance.delete" => Some(handle_performance_delete(state, req)),
        "targets.upsert" => Some(handle_targets_upsert(state, req)),
        "targets.list" => Some(handle_targets_list(state, req)),
        _ => None,
    }
}
