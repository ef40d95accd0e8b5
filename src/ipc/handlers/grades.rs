use crate::calc::{self, AssessmentItem, CourseRef, LetterScale, WeightConfig};
use crate::db;
use crate::ipc::error::{bad_params, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

use super::calc_config::load_letter_scale;

fn handle_student_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let loaded = db::course_name(conn, &course_id)
        .and_then(|_| db::require_student_in_course(conn, &course_id, &student_id))
        .and_then(|_| db::weight_config_get(conn, &course_id))
        .and_then(|weights| {
            let items = db::assessment_items_for_student(conn, &course_id, &student_id)?;
            let scale = load_letter_scale(conn)?;
            Ok((weights, items, scale))
        });
    let (weights, items, scale) = match loaded {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let result = calc::aggregate(&course_id, &student_id, &items, weights.as_ref(), &scale);
    if result.excluded_items > 0 {
        tracing::debug!(
            course_id = %course_id,
            student_id = %student_id,
            excluded = result.excluded_items,
            "malformed assessment items left out of aggregate"
        );
    }
    ok(&req.id, json!(result))
}

fn handle_course_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let loaded = db::course_name(conn, &course_id).and_then(|name| {
        let roster = db::roster(conn, &course_id)?;
        let items = db::assessment_items_for_course(conn, &course_id)?;
        let weights = db::weight_config_get(conn, &course_id)?;
        let scale = load_letter_scale(conn)?;
        Ok((name, roster, items, weights, scale))
    });
    let (name, roster, items, weights, scale) = match loaded {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let summary = calc::summarize_course(
        CourseRef {
            id: course_id,
            name,
        },
        &roster,
        &items,
        weights.as_ref(),
        &scale,
    );
    tracing::debug!(
        course_id = %summary.course.id,
        students = summary.per_student.len(),
        "course summary computed"
    );
    ok(&req.id, json!(summary))
}

fn optional_str(req: &Request, key: &str) -> String {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Aggregates records passed inline. Works without a workspace; when one is open
/// its saved letter scale applies unless the request carries its own.
fn handle_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw_items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return bad_params(&req.id, "items must be an array");
    };

    let mut items: Vec<AssessmentItem> = Vec::with_capacity(raw_items.len());
    let mut undecodable = 0_usize;
    for raw in raw_items {
        match serde_json::from_value::<AssessmentItem>(raw.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable assessment item");
                undecodable += 1;
            }
        }
    }

    let weights = req
        .params
        .get("weights")
        .filter(|v| v.is_object())
        .map(WeightConfig::from_json);

    let scale = match req.params.get("letterScale").filter(|v| !v.is_null()) {
        Some(raw) => {
            let scale: LetterScale = match serde_json::from_value(raw.clone()) {
                Ok(v) => v,
                Err(e) => {
                    return bad_params(&req.id, format!("invalid letterScale: {e}"))
                }
            };
            if let Err(e) = scale.validate() {
                return calc_err(req, e);
            }
            scale
        }
        None => match state.db.as_ref() {
            Some(conn) => match load_letter_scale(conn) {
                Ok(v) => v,
                Err(e) => return store_err(req, e),
            },
            None => LetterScale::default(),
        },
    };

    let mut result = calc::aggregate(
        &optional_str(req, "courseId"),
        &optional_str(req, "studentId"),
        &items,
        weights.as_ref(),
        &scale,
    );
    result.excluded_items += undecodable;
    ok(&req.id, json!(result))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.studentAggregate" => Some(handle_student_aggregate(state, req)),
        "grades.courseSummary" => Some(handle_course_summary(state, req)),
        "grades.compute" => Some(handle_compute(state, req)),
        _ => None,
    }
}
