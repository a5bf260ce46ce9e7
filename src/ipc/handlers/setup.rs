use crate::dashboard::{OverviewLimits, YearPolicy};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "defaultYearPolicy": "latest",
            "topSchoolsLimit": 10,
            "topLocalitiesLimit": 10,
            "evolutionYears": 5,
            "showGeneratedAt": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "defaultYearPolicy" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    let Some(policy) = YearPolicy::parse(&s) else {
                        return Err("defaultYearPolicy must be one of: latest, earliest".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "topSchoolsLimit" | "topLocalitiesLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "evolutionYears" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A bad stored value must not lock the user out of setup.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), error = %e, "stored settings ignored");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Resolved `reports` settings used by the dashboard and report handlers.
#[derive(Debug, Clone, Copy)]
pub struct ReportSettings {
    pub year_policy: YearPolicy,
    pub limits: OverviewLimits,
    pub show_generated_at: bool,
}

pub fn report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    let defaults = OverviewLimits::default();
    let int = |key: &str, fallback: i64| v.get(key).and_then(|x| x.as_i64()).unwrap_or(fallback);
    Ok(ReportSettings {
        year_policy: v
            .get("defaultYearPolicy")
            .and_then(|x| x.as_str())
            .and_then(YearPolicy::parse)
            .unwrap_or_default(),
        limits: OverviewLimits {
            top_schools: int("topSchoolsLimit", defaults.top_schools),
            top_localities: int("topLocalitiesLimit", defaults.top_localities),
            evolution_years: int("evolutionYears", defaults.evolution_years),
        },
        show_generated_at: v
            .get("showGeneratedAt")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "reports": reports }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": section_raw, "settings": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("patch object")
    }

    #[test]
    fn merges_valid_reports_patch() {
        let mut cur = default_section(SetupSection::Reports);
        let res = merge_section_patch(
            SetupSection::Reports,
            &mut cur,
            &patch(json!({ "defaultYearPolicy": "EARLIEST", "topSchoolsLimit": 25 })),
        );
        assert!(res.is_ok());
        assert_eq!(cur["defaultYearPolicy"], "earliest");
        assert_eq!(cur["topSchoolsLimit"], 25);
        assert_eq!(cur["evolutionYears"], 5);
    }

    #[test]
    fn rejects_out_of_range_and_unknown_fields() {
        let mut cur = default_section(SetupSection::Reports);
        for bad in [
            json!({ "evolutionYears": 0 }),
            json!({ "topLocalitiesLimit": 101 }),
            json!({ "defaultYearPolicy": "middle" }),
            json!({ "showGeneratedAt": "yes" }),
            json!({ "colour": "blue" }),
        ] {
            assert!(merge_section_patch(SetupSection::Reports, &mut cur, &patch(bad)).is_err());
        }
    }
}
