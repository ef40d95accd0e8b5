use serde_json::json;

/// Stable error codes raised at the IPC layer. Store failures carry their own
/// code from `StoreError::code`.
pub mod code {
    pub const BAD_JSON: &str = "bad_json";
    pub const BAD_PARAMS: &str = "bad_params";
    pub const NO_WORKSPACE: &str = "no_workspace";
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    pub const DB_OPEN_FAILED: &str = "db_open_failed";
    pub const DB_UPDATE_FAILED: &str = "db_update_failed";
}

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
    json!({
        "id": id,
        "ok": false,
        "error": error_body(code, message.into(), details),
    })
}

pub fn bad_params(id: &str, message: impl Into<String>) -> serde_json::Value {
    err(id, code::BAD_PARAMS, message, None)
}

pub fn update_failed(id: &str, e: impl std::fmt::Display) -> serde_json::Value {
    err(id, code::DB_UPDATE_FAILED, e.to_string(), None)
}

/// Reply to a line that is not a request at all; there is no id to echo.
pub fn bad_json(e: &serde_json::Error) -> serde_json::Value {
    json!({
        "ok": false,
        "error": error_body(code::BAD_JSON, e.to_string(), None),
    })
}

fn error_body(code: &str, message: String, details: Option<serde_json::Value>) -> serde_json::Value {
    let mut body = json!({ "code": code, "message": message });
    if let Some(d) = details {
        body["details"] = d;
    }
    body
}
