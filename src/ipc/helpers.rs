use crate::ipc::error::err;
use crate::ipc::types::Request;
use serde::de::DeserializeOwned;

pub fn no_workspace(req: &Request) -> serde_json::Value {
    err(&req.id, "no_workspace", "select a workspace first", None)
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
    }
}

/// Deserialize the whole params object into a typed input.
pub fn params_as<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    let params = if req.params.is_null() {
        serde_json::json!({})
    } else {
        req.params.clone()
    };
    serde_json::from_value(params).map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}
