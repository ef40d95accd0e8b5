use crate::calc::{self, Category, WeightConfig};
use crate::db;
use crate::ipc::error::{bad_params, ok, update_failed};
use crate::ipc::helpers::{db_conn, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const SUM_TOLERANCE: f64 = 1e-9;

fn field_category(key: &str) -> Option<Category> {
    match key {
        "assignmentWeight" => Some(Category::Assignment),
        "quizWeight" => Some(Category::Quiz),
        "midtermWeight" => Some(Category::Midterm),
        "finalWeight" => Some(Category::Final),
        _ => None,
    }
}

fn sum_is_100(sum: f64) -> bool {
    (sum - 100.0).abs() < SUM_TOLERANCE
}

fn handle_weights_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::course_name(conn, &course_id) {
        return store_err(req, e);
    }
    let raw = match db::weight_config_get(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let resolved = calc::resolve_weights(raw.as_ref());
    let weight_sum = resolved.sum();
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "configured": raw.is_some(),
            "raw": raw.unwrap_or_default(),
            "resolved": resolved,
            "weightSum": weight_sum,
            "sumIs100": sum_is_100(weight_sum)
        }),
    )
}

fn handle_weights_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return bad_params(&req.id, "patch must be an object");
    };
    if let Err(e) = db::course_name(conn, &course_id) {
        return store_err(req, e);
    }

    let mut cfg: WeightConfig = match db::weight_config_get(conn, &course_id) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return store_err(req, e),
    };
    for (k, v) in patch {
        let Some(category) = field_category(k) else {
            return bad_params(&req.id, format!("unknown weight field: {}", k));
        };
        let value = if v.is_null() {
            None
        } else if let Some(n) = v.as_f64() {
            Some(n)
        } else {
            return bad_params(&req.id, format!("{} must be a number or null", k));
        };
        cfg.set(category, value);
    }

    if let Err(e) = db::weight_config_put(conn, &course_id, &cfg) {
        return match e {
            db::StoreError::InvalidValue(_) => store_err(req, e),
            other => update_failed(&req.id, other),
        };
    }

    let resolved = calc::resolve_weights(Some(&cfg));
    let weight_sum = resolved.sum();
    let mut warnings: Vec<String> = Vec::new();
    if !sum_is_100(weight_sum) {
        tracing::warn!(course_id = %course_id, weight_sum, "category weights do not sum to 100");
        warnings.push(format!(
            "weights sum to {} rather than 100; final percentages are reported as computed",
            weight_sum
        ));
    }

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "resolved": resolved,
            "weightSum": weight_sum,
            "warnings": warnings
        }),
    )
}

fn handle_weights_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::weight_config_delete(conn, &course_id) {
        Ok(removed) => ok(&req.id, json!({ "ok": true, "removed": removed })),
        Err(e) => update_failed(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weights.get" => Some(handle_weights_get(state, req)),
        "weights.update" => Some(handle_weights_update(state, req)),
        "weights.clear" => Some(handle_weights_clear(state, req)),
        _ => None,
    }
}
