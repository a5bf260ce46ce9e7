use crate::store::StoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn store_err(id: &str, e: StoreError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

/// Reply to a line that could not be parsed; there is no id to echo.
pub fn bad_json(message: &str) -> serde_json::Value {
    json!({
        "ok": false,
        "error": { "code": "bad_json", "message": message }
    })
}
