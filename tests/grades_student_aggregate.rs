use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn open_workspace_db(workspace: &Path) -> Connection {
    let conn = Connection::open(workspace.join("gradebook.sqlite3")).expect("open db");
    conn.execute_batch("PRAGMA foreign_keys = ON;").expect("fk on");
    conn
}

fn seed_course_and_student(conn: &Connection, course_id: &str, student_id: &str) {
    conn.execute(
        "INSERT INTO courses(id, name) VALUES(?, ?)",
        (course_id, "Biology 11"),
    )
    .expect("insert course");
    conn.execute(
        "INSERT INTO students(id, course_id, last_name, first_name, active, sort_order)
         VALUES(?, ?, ?, ?, 1, 0)",
        (student_id, course_id, "Lee", "Avery"),
    )
    .expect("insert student");
}

fn insert_item(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
    category: &str,
    score: f64,
    max_score: Option<f64>,
) {
    conn.execute(
        "INSERT INTO assessment_items(id, course_id, student_id, category, title, score, max_score)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            course_id,
            student_id,
            category,
            format!("{} item", category),
            score,
            max_score,
        ),
    )
    .expect("insert item");
}

fn weighted(result: &serde_json::Value, category: &str) -> f64 {
    result["categoryWeighted"][category]
        .as_f64()
        .unwrap_or_else(|| panic!("categoryWeighted.{} missing", category))
}

#[test]
fn worked_example_aggregates_to_83_2_and_b() {
    let workspace = temp_dir("gradebookd-worked-example");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    let course_id = Uuid::new_v4().to_string();
    let student_id = Uuid::new_v4().to_string();
    seed_course_and_student(&conn, &course_id, &student_id);
    insert_item(&conn, &course_id, &student_id, "assignment", 85.0, Some(100.0));
    insert_item(&conn, &course_id, &student_id, "quiz", 90.0, Some(100.0));
    insert_item(&conn, &course_id, &student_id, "midterm", 78.0, Some(100.0));
    insert_item(&conn, &course_id, &student_id, "final", 82.0, Some(100.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "weights.update",
        json!({
            "courseId": course_id,
            "patch": {
                "assignmentWeight": 20,
                "quizWeight": 20,
                "midtermWeight": 25,
                "finalWeight": 35
            }
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.studentAggregate",
        json!({ "courseId": course_id, "studentId": student_id }),
    );

    assert_eq!(result["courseId"], json!(course_id));
    assert_eq!(result["studentId"], json!(student_id));
    assert!((weighted(&result, "assignment") - 17.0).abs() < 1e-9);
    assert!((weighted(&result, "quiz") - 18.0).abs() < 1e-9);
    assert!((weighted(&result, "midterm") - 19.5).abs() < 1e-9);
    assert!((weighted(&result, "final") - 28.7).abs() < 1e-9);
    let pct = result["finalPercentage"].as_f64().expect("finalPercentage");
    assert!((pct - 83.2).abs() < 1e-9);
    assert_eq!(result["letterGrade"], json!("B"));
    assert_eq!(result["excludedItems"], json!(0));

    // Same inputs, same answer.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.studentAggregate",
        json!({ "courseId": course_id, "studentId": student_id }),
    );
    assert_eq!(again, result);

    let _ = child.kill();
}

#[test]
fn malformed_items_are_excluded_without_failing() {
    let workspace = temp_dir("gradebookd-malformed");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    seed_course_and_student(&conn, "c1", "s1");
    insert_item(&conn, "c1", "s1", "assignment", 10.0, Some(10.0));
    insert_item(&conn, "c1", "s1", "assignment", 4.0, Some(4.0));

    let clean = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.studentAggregate",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );

    insert_item(&conn, "c1", "s1", "assignment", 7.0, Some(0.0));
    insert_item(&conn, "c1", "s1", "assignment", 7.0, None);
    insert_item(&conn, "c1", "s1", "homework", 100.0, Some(100.0));
    insert_item(&conn, "c1", "s1", "midterm", 5.0, Some(0.0));

    let dirty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.studentAggregate",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );

    assert_eq!(
        weighted(&clean, "assignment").to_bits(),
        weighted(&dirty, "assignment").to_bits()
    );
    assert_eq!(weighted(&dirty, "midterm"), 0.0);
    assert_eq!(dirty["excludedItems"], json!(4));
    assert_eq!(dirty["finalPercentage"], clean["finalPercentage"]);

    let assignment = dirty["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .find(|c| c["category"] == json!("assignment"))
        .expect("assignment breakdown")
        .clone();
    assert_eq!(assignment["itemCount"], json!(2));
    assert_eq!(assignment["excludedCount"], json!(2));

    let _ = child.kill();
}

#[test]
fn missing_categories_contribute_zero_with_default_weights() {
    let workspace = temp_dir("gradebookd-missing-cats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    seed_course_and_student(&conn, "c1", "s1");
    insert_item(&conn, "c1", "s1", "assignment", 9.0, Some(10.0));
    insert_item(&conn, "c1", "s1", "final", 40.0, Some(50.0));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.studentAggregate",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );

    assert_eq!(weighted(&result, "quiz"), 0.0);
    assert_eq!(weighted(&result, "midterm"), 0.0);
    let expected = weighted(&result, "assignment") + weighted(&result, "final");
    let pct = result["finalPercentage"].as_f64().expect("finalPercentage");
    assert!((pct - expected).abs() < 1e-12);
    // Defaults: 0.9 * 20 + 0.8 * 35.
    assert!((pct - 46.0).abs() < 1e-9);
    assert_eq!(result["letterGrade"], json!("F"));
    assert_eq!(result["weightSum"], json!(100.0));

    let _ = child.kill();
}

#[test]
fn student_without_items_gets_zero_and_f() {
    let workspace = temp_dir("gradebookd-no-items");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    seed_course_and_student(&conn, "c1", "s1");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.studentAggregate",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );
    assert_eq!(result["finalPercentage"], json!(0.0));
    assert_eq!(result["letterGrade"], json!("F"));
    for category in ["assignment", "quiz", "midterm", "final"] {
        assert_eq!(weighted(&result, category), 0.0);
    }

    let _ = child.kill();
}
