use crate::calc::LetterScale;
use crate::db;
use crate::ipc::error::{bad_params, ok, update_failed};
use crate::ipc::helpers::{calc_err, db_conn, store_err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const LETTER_SCALE_KEY: &str = "calc.letterScale";

/// Saved letter scale, or the default one. A saved value that no longer decodes
/// or validates is ignored so grading keeps working.
pub fn load_letter_scale(conn: &Connection) -> Result<LetterScale, db::StoreError> {
    let Some(saved) = db::settings_get_json(conn, LETTER_SCALE_KEY)? else {
        return Ok(LetterScale::default());
    };
    match serde_json::from_value::<LetterScale>(saved) {
        Ok(scale) if scale.validate().is_ok() => Ok(scale),
        _ => {
            tracing::warn!(key = LETTER_SCALE_KEY, "ignoring malformed saved letter scale");
            Ok(LetterScale::default())
        }
    }
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match load_letter_scale(conn) {
        Ok(scale) => ok(&req.id, json!({ "letterScale": scale })),
        Err(e) => store_err(req, e),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("letterScale") else {
        return bad_params(&req.id, "missing letterScale");
    };

    if raw.is_null() {
        if let Err(e) = db::settings_delete(conn, LETTER_SCALE_KEY) {
            return update_failed(&req.id, e);
        }
        return ok(&req.id, json!({ "letterScale": LetterScale::default() }));
    }

    let scale: LetterScale = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return bad_params(
                &req.id,
                format!("letterScale must be {{cuts:[{{minPercent,letter}}], floor}}: {e}"),
            )
        }
    };
    if let Err(e) = scale.validate() {
        return calc_err(req, e);
    }
    if let Err(e) = db::settings_set_json(conn, LETTER_SCALE_KEY, &json!(scale)) {
        return update_failed(&req.id, e);
    }
    ok(&req.id, json!({ "letterScale": scale }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.config.get" => Some(handle_config_get(state, req)),
        "calc.config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
