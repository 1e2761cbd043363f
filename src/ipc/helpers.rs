use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Trimmed string param; missing or non-string is `bad_params`.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) => Ok(v.trim().to_string()),
        None => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

pub fn optional_str(obj: &serde_json::Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

/// Lowercased `params.search`, matched as typed (surrounding spaces count).
/// An empty string means no filter.
pub fn search_param(req: &Request) -> Option<String> {
    req.params
        .get("search")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

pub fn patch_object<'a>(
    req: &'a Request,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, serde_json::Value> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| err(&req.id, "bad_params", "missing patch", None))
}

/// Year level arrives as a number or as select-box text ("3").
pub fn parse_year_level(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
