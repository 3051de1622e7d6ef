use crate::db;
use crate::engine::{LessonRecord, RosterIndex};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{lesson_rules, LessonRules};
use crate::ipc::helpers::{db_conn, ensure_exists, parse_opt_string, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use uuid::Uuid;

const REQUIRED_FIELDS: [&str; 4] = ["unit", "lesson", "objective", "pages"];
const OPTIONAL_FIELDS: [&str; 2] = ["homework", "comments"];

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn lesson_json(record: &LessonRecord) -> Value {
    json!({
        "id": record.id,
        "teacherId": record.teacher_id,
        "classId": record.class_id,
        "subjectId": record.subject_id,
        "date": store::format_iso_date(record.date),
        "unit": record.unit,
        "lesson": record.lesson,
        "objective": record.objective,
        "pages": record.pages,
        "homework": record.homework,
        "comments": record.comments,
    })
}

/// Teacher must be on the roster with both the class and the subject assigned.
fn check_assignment(
    conn: &Connection,
    req: &Request,
    teacher_id: &str,
    class_id: &str,
    subject_id: &str,
) -> Result<(), Value> {
    let roster = match store::load_roster(conn) {
        Ok(t) => RosterIndex::build(&t),
        Err(e) => return Err(err(&req.id, "db_query_failed", format!("{e:#}"), None)),
    };
    if roster.teaches(teacher_id, class_id, subject_id) {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "forbidden",
            "teacher is not assigned to this class and subject",
            Some(json!({ "classId": class_id, "subjectId": subject_id })),
        ))
    }
}

/// Loads a lesson for a mutating call and applies the ownership and same-day rules.
fn load_owned_lesson(
    conn: &Connection,
    req: &Request,
    rules: LessonRules,
    teacher_id: &str,
    lesson_id: &str,
) -> Result<LessonRecord, Value> {
    let record = match store::load_lesson(conn, lesson_id) {
        Ok(Some(r)) => r,
        Ok(None) => {
            return Err(err(
                &req.id,
                "not_found",
                "lesson not found",
                Some(json!({ "id": lesson_id })),
            ))
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", format!("{e:#}"), None)),
    };
    if record.teacher_id != teacher_id {
        return Err(err(&req.id, "forbidden", "lesson belongs to another teacher", None));
    }
    if rules.restrict_edits_to_today && record.date != today() {
        return Err(err(
            &req.id,
            "forbidden",
            "only lessons dated today can be changed",
            Some(json!({ "date": store::format_iso_date(record.date) })),
        ));
    }
    Ok(record)
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut content: Vec<String> = Vec::with_capacity(REQUIRED_FIELDS.len());
    for field in REQUIRED_FIELDS {
        match required_str(req, field) {
            Ok(v) => content.push(v),
            Err(e) => return e,
        }
    }
    let homework = match parse_opt_string(req.params.get("homework")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("homework {}", m), None),
    };
    let comments = match parse_opt_string(req.params.get("comments")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("comments {}", m), None),
    };

    for (table, id, label) in [
        ("users", teacher_id.as_str(), "teacher"),
        ("classes", class_id.as_str(), "class"),
        ("subjects", subject_id.as_str(), "subject"),
    ] {
        if let Err(e) = ensure_exists(conn, req, table, id, label) {
            return e;
        }
    }

    let rules = match lesson_rules(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    if rules.require_assigned_subject {
        if let Err(e) = check_assignment(conn, req, &teacher_id, &class_id, &subject_id) {
            return e;
        }
    }

    let record = LessonRecord {
        id: Uuid::new_v4().to_string(),
        teacher_id,
        class_id,
        subject_id,
        date,
        unit: content[0].clone(),
        lesson: content[1].clone(),
        objective: content[2].clone(),
        pages: content[3].clone(),
        homework,
        comments,
    };
    let ts = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(
           id, teacher_id, class_id, subject_id, lesson_date, unit, lesson,
           objective, pages, homework, comments, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id,
            record.teacher_id,
            record.class_id,
            record.subject_id,
            store::format_iso_date(record.date),
            record.unit,
            record.lesson,
            record.objective,
            record.pages,
            record.homework,
            record.comments,
            ts,
            ts
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    tracing::info!(
        lesson_id = record.id.as_str(),
        teacher_id = record.teacher_id.as_str(),
        class_id = record.class_id.as_str(),
        subject_id = record.subject_id.as_str(),
        date = %record.date,
        "lesson submitted"
    );
    ok(&req.id, json!({ "lessonId": record.id, "lesson": lesson_json(&record) }))
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_lessons_for_day(conn, &class_id, date) {
        Ok(records) => {
            let lessons: Vec<Value> = records.iter().map(lesson_json).collect();
            ok(&req.id, json!({ "lessons": lessons }))
        }
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_lessons_list_mine(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_teacher_lessons_for_day(conn, &teacher_id, date) {
        Ok(records) => {
            let lessons: Vec<Value> = records.iter().map(lesson_json).collect();
            ok(&req.id, json!({ "lessons": lessons }))
        }
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    if patch.is_empty() {
        return err(&req.id, "bad_params", "patch must change at least one field", None);
    }

    // Column names come from the two field lists, never from the request.
    let mut sets: Vec<(&'static str, Option<String>)> = Vec::new();
    for (key, value) in patch {
        if let Some(field) = REQUIRED_FIELDS.iter().find(|f| **f == key.as_str()) {
            match parse_opt_string(Some(value)) {
                Ok(Some(s)) => sets.push((*field, Some(s))),
                Ok(None) => {
                    return err(&req.id, "bad_params", format!("{} must not be empty", key), None)
                }
                Err(m) => return err(&req.id, "bad_params", format!("{} {}", key, m), None),
            }
        } else if let Some(field) = OPTIONAL_FIELDS.iter().find(|f| **f == key.as_str()) {
            match parse_opt_string(Some(value)) {
                Ok(v) => sets.push((*field, v)),
                Err(m) => return err(&req.id, "bad_params", format!("{} {}", key, m), None),
            }
        } else {
            return err(&req.id, "bad_params", format!("unknown lesson field: {}", key), None);
        }
    }

    let rules = match lesson_rules(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    if let Err(e) = load_owned_lesson(conn, req, rules, &teacher_id, &lesson_id) {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (column, value) in &sets {
        let sql = format!("UPDATE lessons SET {} = ? WHERE id = ?", column);
        if let Err(e) = tx.execute(&sql, params![value, lesson_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.execute(
        "UPDATE lessons SET updated_at = ? WHERE id = ?",
        params![db::now_ts(), lesson_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match store::load_lesson(conn, &lesson_id) {
        Ok(Some(record)) => ok(&req.id, json!({ "lesson": lesson_json(&record) })),
        Ok(None) => err(&req.id, "not_found", "lesson not found", None),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rules = match lesson_rules(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    if let Err(e) = load_owned_lesson(conn, req, rules, &teacher_id, &lesson_id) {
        return e;
    }
    if let Err(e) = conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }
    tracing::info!(lesson_id = lesson_id.as_str(), "lesson deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.listMine" => Some(handle_lessons_list_mine(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
