use crate::dashboard::Filters;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::handlers::setup::report_settings;
use crate::ipc::helpers::{no_workspace, params_as, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::report_card::{assemble, CorrectionRules};
use crate::reports;
use crate::store;
use serde_json::json;

/// Stamp a report result with the generation time when the workspace asks
/// for it.
fn with_generated_at(conn: &rusqlite::Connection, mut result: serde_json::Value) -> serde_json::Value {
    let show = match report_settings(conn) {
        Ok(s) => s.show_generated_at,
        Err(e) => {
            tracing::warn!(error = %e, "report settings unavailable");
            true
        }
    };
    if show {
        result["generatedAt"] = json!(chrono::Utc::now().to_rfc3339());
    }
    result
}

fn handle_school_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let school_id = match required_i64(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let school_name = match store::school_name(conn, school_id) {
        Ok(Some(name)) => name,
        Ok(None) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return store_err(&req.id, e),
    };
    let grades = match store::list_grades(conn) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let subjects = match store::list_subjects(conn) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let records = match store::load_school_records(conn, school_id) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };

    let card = assemble(
        school_id,
        &school_name,
        &grades,
        &subjects,
        &records,
        &CorrectionRules::default(),
    );
    match serde_json::to_value(&card) {
        Ok(v) => ok(&req.id, with_generated_at(conn, json!({ "reportCard": v }))),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_school_report_card_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let school_id = match required_i64(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match reports::report_card_export(conn, school_id) {
        Ok(Some(export)) => ok(
            &req.id,
            with_generated_at(
                conn,
                json!({
                    "title": "Boletim de Desempenho - SABE",
                    "columns": ["Ano", "Série", "Disciplina", "Proficiência", "Participação (%)", "Padrão"],
                    "school": export.school,
                    "rows": export.rows
                }),
            ),
        ),
        Ok(None) => err(&req.id, "not_found", "school not found", None),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_performance_table(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let filters: Filters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match reports::performance_table(conn, &filters) {
        Ok(rows) => ok(
            &req.id,
            with_generated_at(
                conn,
                json!({
                    "columns": ["Ano", "Escola", "Série", "Disciplina", "Proficiência", "Alunos"],
                    "rows": rows
                }),
            ),
        ),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_participants(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let filters: Filters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match reports::participants(conn, &filters) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.schoolReportCard" => Some(handle_school_report_card(state, req)),
        "reports.schoolReportCardExport" => Some(handle_school_report_card_export(state, req)),
        "reports.performanceTable" => Some(handle_performance_table(state, req)),
        "reports.participants" => Some(handle_participants(state, req)),
        _ => None,
    }
}
