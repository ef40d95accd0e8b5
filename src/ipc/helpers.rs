use crate::calc::CalcError;
use crate::db::StoreError;
use crate::ipc::error::{bad_params, code, err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_params(&req.id, format!("missing {}", key)))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, code::NO_WORKSPACE, "select a workspace first", None))
}

pub fn store_err(req: &Request, e: StoreError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}
