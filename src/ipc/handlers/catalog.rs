use crate::dashboard::school_profile;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{no_workspace, optional_i64, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn handle_localities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "localities": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT l.id, l.name,
           (SELECT COUNT(*) FROM schools s WHERE s.locality_id = l.id) AS school_count
         FROM localities l
         ORDER BY l.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let school_count: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "schoolCount": school_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(localities) => ok(&req.id, json!({ "localities": localities })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_localities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match optional_i64(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = conn.execute(
        "INSERT INTO localities(id, name) VALUES(?, ?)",
        (id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "localities" })),
        );
    }
    let id = id.unwrap_or_else(|| conn.last_insert_rowid());
    ok(&req.id, json!({ "localityId": id, "name": name }))
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schools": [] }));
    };
    let locality_id = match optional_i64(req, "localityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.inep, s.name, s.district, s.locality_id, l.name,
           (SELECT COUNT(*) FROM performances p WHERE p.school_id = s.id) AS record_count
         FROM schools s
         LEFT JOIN localities l ON l.id = s.locality_id
         WHERE (?1 IS NULL OR s.locality_id = ?1)
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([locality_id], |row| {
            let id: i64 = row.get(0)?;
            let inep: String = row.get(1)?;
            let name: String = row.get(2)?;
            let district: Option<String> = row.get(3)?;
            let locality_id: i64 = row.get(4)?;
            let locality_name: Option<String> = row.get(5)?;
            let record_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "inep": inep,
                "name": name,
                "district": district,
                "localityId": locality_id,
                "localityName": locality_name,
                "recordCount": record_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schools_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let inep = match required_str(req, "inep") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let locality_id = match required_i64(req, "localityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let extra_json = match req.params.get("extra") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) if v.is_object() => Some(v.to_string()),
        Some(_) => return err(&req.id, "bad_params", "extra must be an object", None),
    };

    let locality_known: Result<Option<i64>, _> = conn
        .query_row("SELECT id FROM localities WHERE id = ?", [locality_id], |r| {
            r.get(0)
        })
        .optional();
    match locality_known {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "locality not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let existed: Result<Option<i64>, _> = conn
        .query_row("SELECT id FROM schools WHERE id = ?", [id], |r| r.get(0))
        .optional();
    let existed = match existed {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, inep, name, address, district, manager, phone, locality_id, extra_json)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           inep = excluded.inep,
           name = excluded.name,
           address = excluded.address,
           district = excluded.district,
           manager = excluded.manager,
           phone = excluded.phone,
           locality_id = excluded.locality_id,
           extra_json = excluded.extra_json",
        rusqlite::params![
            id,
            inep,
            name,
            opt_str(req, "address"),
            opt_str(req, "district"),
            opt_str(req, "manager"),
            opt_str(req, "phone"),
            locality_id,
            extra_json,
        ],
    ) {
        let code = if existed {
            "db_update_failed"
        } else {
            "db_insert_failed"
        };
        return err(&req.id, code, e.to_string(), Some(json!({ "table": "schools" })));
    }
    ok(&req.id, json!({ "schoolId": id, "created": !existed }))
}

fn handle_schools_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let id = match required_i64(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match school_profile(conn, id) {
        Ok(Some(school)) => ok(&req.id, json!({ "school": school })),
        Ok(None) => err(&req.id, "not_found", "school not found", None),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_schools_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(req);
    };
    let id = match required_i64(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    let removed_records = match tx.execute("DELETE FROM performances WHERE school_id = ?", [id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "performances" })),
            )
        }
    };
    let removed = match tx.execute("DELETE FROM schools WHERE id = ?", [id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "schools" })),
            )
        }
    };
    if removed == 0 {
        return err(&req.id, "not_found", "school not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "removedRecords": removed_records }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    match store::list_subjects(conn) {
        Ok(v) => ok(&req.id, json!({ "subjects": v })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };
    match store::list_grades(conn) {
        Ok(v) => ok(&req.id, json!({ "grades": v })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = opt_str(req, "code");
    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name, "code": code }))
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let level = opt_str(req, "educationLevel");
    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, name, education_level) VALUES(?, ?, ?)",
        (&grade_id, &name, &level),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    ok(
        &req.id,
        json!({ "gradeId": grade_id, "name": name, "educationLevel": level }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "localities.list" => Some(handle_localities_list(state, req)),
        "localities.create" => Some(handle_localities_create(state, req)),
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.upsert" => Some(handle_schools_upsert(state, req)),
        "schools.get" => Some(handle_schools_get(state, req)),
        "schools.delete" => Some(handle_schools_delete(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        _ => None,
    }
}
