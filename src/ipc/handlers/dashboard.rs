use crate::dashboard::{self, Filters};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::handlers::setup::report_settings;
use crate::ipc::helpers::{no_workspace, optional_i64, params_as, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, RecordFilters};
use serde_json::json;

fn handle_years(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let settings = match report_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match dashboard::distinct_years(conn) {
        Ok(years) => ok(
            &req.id,
            json!({
                "years": years,
                "selectedYear": settings.year_policy.pick(&years),
                "policy": settings.year_policy.as_str()
            }),
        ),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let filters: Filters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let settings = match report_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match dashboard::overview(conn, &filters, settings.limits) {
        Ok(overview) => ok(&req.id, json!({ "overview": overview })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_school_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let school_id = match required_i64(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let school = match dashboard::school_profile(conn, school_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return store_err(&req.id, e),
    };
    let by_year = match dashboard::school_year_averages(conn, school_id) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    let filters = RecordFilters {
        school_id: Some(school_id),
        ..RecordFilters::default()
    };
    let records = match store::list_performances(conn, &filters) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, e),
    };
    ok(
        &req.id,
        json!({ "school": school, "byYear": by_year, "records": records }),
    )
}

fn handle_year_comparison(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let first = match optional_i64(req, "firstYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let second = match optional_i64(req, "secondYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match dashboard::year_comparison(conn, first, second) {
        Ok(cmp) => ok(&req.id, json!({ "comparison": cmp })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_school_comparison(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let first = match required_i64(req, "firstSchoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let second = match required_i64(req, "secondSchoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match dashboard::school_comparison(conn, first, second, &grade_id) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let filters: Filters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match dashboard::ranking(conn, &filters) {
        Ok(rows) => ok(&req.id, json!({ "ranking": rows })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_locality_panel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let filters: Filters = match params_as(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match dashboard::locality_panel(conn, &filters) {
        Ok(rows) => ok(&req.id, json!({ "localities": rows })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_target_comparison(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let year = match optional_i64(req, "year") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match dashboard::target_comparison(conn, year) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.years" => Some(handle_years(state, req)),
        "dashboard.overview" => Some(handle_overview(state, req)),
        "dashboard.schoolDetails" => Some(handle_school_details(state, req)),
        "dashboard.yearComparison" => Some(handle_year_comparison(state, req)),
        "dashboard.schoolComparison" => Some(handle_school_comparison(state, req)),
        "dashboard.ranking" => Some(handle_ranking(state, req)),
        "dashboard.localityPanel" => Some(handle_locality_panel(state, req)),
        "dashboard.targetComparison" => Some(handle_target_comparison(state, req)),
        _ => None,
    }
}
