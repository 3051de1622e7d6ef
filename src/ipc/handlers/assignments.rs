use crate::engine::{
    day_index_of, find_missing, resolve, resolve_classes, AssignmentRow, RosterIndex,
    SubmissionIndex,
};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, ensure_exists, present_id, required_date};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Display names joined onto engine output. Unknown ids fall back to the id.
struct Names {
    subjects: HashMap<String, String>,
    classes: HashMap<String, String>,
}

impl Names {
    fn load(conn: &rusqlite::Connection) -> anyhow::Result<Self> {
        Ok(Self {
            subjects: store::names_by_id(conn, "subjects")?,
            classes: store::names_by_id(conn, "classes")?,
        })
    }

    fn subject<'a>(&'a self, id: &'a str) -> &'a str {
        self.subjects.get(id).map(|s| s.as_str()).unwrap_or(id)
    }

    fn class<'a>(&'a self, id: &'a str) -> &'a str {
        self.classes.get(id).map(|s| s.as_str()).unwrap_or(id)
    }
}

fn row_json(row: &AssignmentRow, roster: &RosterIndex, names: &Names) -> Value {
    let candidates: Vec<Value> = row
        .candidates
        .iter()
        .map(|id| {
            json!({
                "teacherId": id,
                "teacherName": roster.teacher_name(id),
            })
        })
        .collect();
    json!({
        "classId": row.class_id,
        "dayIndex": row.day_index,
        "subjectId": row.subject_id,
        "subjectName": names.subject(&row.subject_id),
        "teacherId": row.teacher_id,
        "teacherName": row.teacher_id.as_deref().and_then(|id| roster.teacher_name(id)),
        "candidates": candidates,
        "lessonId": row.lesson.as_ref().map(|l| l.id.as_str()),
        "state": row.state.as_str(),
    })
}

fn handle_assignments_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match present_id(req, "classId") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing classId", None),
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "classes", &class_id, "class") {
        return e;
    }

    let schedules = match store::load_schedule_store(conn, std::slice::from_ref(&class_id)) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let roster = match store::load_roster(conn) {
        Ok(t) => RosterIndex::build(&t),
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let lessons = match store::load_lessons_for_day(conn, &class_id, date) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let names = match Names::load(conn) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    let submissions = SubmissionIndex::for_day(&class_id, date, lessons);
    let rows = match resolve(&schedules, &roster, &submissions, &class_id, date) {
        Ok(r) => r,
        Err(e) => return engine_err(&req.id, &e),
    };
    if submissions.duplicates() > 0 {
        tracing::info!(
            class_id = class_id.as_str(),
            date = %date,
            duplicates = submissions.duplicates(),
            "duplicate lessons ignored; earliest submission matched"
        );
    }

    let rows_json: Vec<Value> = rows.iter().map(|r| row_json(r, &roster, &names)).collect();
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "className": names.class(&class_id),
            "date": store::format_iso_date(date),
            "dayIndex": day_index_of(date),
            "rows": rows_json,
        }),
    )
}

fn handle_assignments_missing(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Only an absent classId widens the report to every class.
    let class_ids = match present_id(req, "classId") {
        Ok(Some(class_id)) => {
            if let Err(e) = ensure_exists(conn, req, "classes", &class_id, "class") {
                return e;
            }
            vec![class_id]
        }
        Ok(None) => match store::class_ids(conn) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
        },
        Err(e) => return e,
    };

    let schedules = match store::load_schedule_store(conn, &class_ids) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let roster = match store::load_roster(conn) {
        Ok(t) => RosterIndex::build(&t),
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let mut indexes = Vec::with_capacity(class_ids.len());
    for class_id in &class_ids {
        match store::load_lessons_for_day(conn, class_id, date) {
            Ok(lessons) => indexes.push(SubmissionIndex::for_day(class_id, date, lessons)),
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
        }
    }
    let names = match Names::load(conn) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    let resolved = match resolve_classes(&schedules, &roster, &indexes, date) {
        Ok(r) => r,
        Err(e) => return engine_err(&req.id, &e),
    };
    let report = find_missing(resolved.iter().flat_map(|(_, rows)| rows.iter()));

    let missing: Vec<Value> = report
        .missing
        .iter()
        .map(|m| {
            json!({
                "teacherId": m.teacher_id,
                "teacherName": roster.teacher_name(&m.teacher_id),
                "classId": m.class_id,
                "className": names.class(&m.class_id),
                "subjectId": m.subject_id,
                "subjectName": names.subject(&m.subject_id),
            })
        })
        .collect();
    let unresolvable: Vec<Value> = report
        .unresolvable
        .iter()
        .map(|u| {
            json!({
                "classId": u.class_id,
                "className": names.class(&u.class_id),
                "subjectId": u.subject_id,
                "subjectName": names.subject(&u.subject_id),
                "dayIndex": u.day_index,
            })
        })
        .collect();
    let by_teacher: Vec<Value> = report
        .by_teacher()
        .iter()
        .map(|t| {
            let subject_ids: Vec<&str> = t.slots.iter().map(|s| s.subject_id.as_str()).collect();
            let subject_names: Vec<&str> = subject_ids.iter().map(|id| names.subject(id)).collect();
            json!({
                "teacherId": t.teacher_id,
                "teacherName": roster.teacher_name(&t.teacher_id),
                "subjectIds": subject_ids,
                "subjectNames": subject_names,
                "slots": t.slots,
            })
        })
        .collect();

    tracing::debug!(
        date = %date,
        classes = class_ids.len(),
        scheduled = schedules.len(),
        teachers = roster.len(),
        missing = missing.len(),
        unresolvable = unresolvable.len(),
        "missing-submission report"
    );
    ok(
        &req.id,
        json!({
            "date": store::format_iso_date(date),
            "dayIndex": day_index_of(date),
            "clear": report.is_clear(),
            "missing": missing,
            "unresolvable": unresolvable,
            "byTeacher": by_teacher,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.resolve" => Some(handle_assignments_resolve(state, req)),
        "assignments.missing" => Some(handle_assignments_missing(state, req)),
        _ => None,
    }
}
