use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_exists, is_unique_violation, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let teacher_links = {
        let mut stmt = match conn.prepare(
            "SELECT ts.subject_id, ts.teacher_id
             FROM teacher_subjects ts
             JOIN users u ON u.id = ts.teacher_id
             WHERE u.role = 'TEACHER'
             ORDER BY u.rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => {
                let mut by_subject: HashMap<String, Vec<String>> = HashMap::new();
                for (subject_id, teacher_id) in v {
                    by_subject.entry(subject_id).or_default().push(teacher_id);
                }
                by_subject
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let teacher_ids = teacher_links.get(&id).cloned().unwrap_or_default();
            Ok(json!({
                "id": id,
                "name": name,
                "teacherIds": teacher_ids,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO subjects(id, name, created_at) VALUES(?, ?, ?)",
        (&subject_id, &name, db::now_ts()),
    ) {
        Ok(_) => ok(&req.id, json!({ "subjectId": subject_id, "name": name })),
        Err(e) if is_unique_violation(&e) => {
            err(&req.id, "conflict", "subject name already exists", None)
        }
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        ),
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(_) => return err(&req.id, "bad_params", "name is required", None),
    };
    if let Err(e) = ensure_exists(conn, req, "subjects", &subject_id, "subject") {
        return e;
    }
    match conn.execute(
        "UPDATE subjects SET name = ? WHERE id = ?",
        (&name, &subject_id),
    ) {
        Ok(_) => ok(&req.id, json!({ "subjectId": subject_id, "name": name })),
        Err(e) if is_unique_violation(&e) => {
            err(&req.id, "conflict", "subject name already exists", None)
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "subjects", &subject_id, "subject") {
        return e;
    }

    // Schedules are history; a subject they list stays until they are deleted.
    let (active, superseded): (i64, i64) = match conn.query_row(
        "SELECT
           COUNT(DISTINCT CASE WHEN s.is_active = 1 THEN s.id END),
           COUNT(DISTINCT CASE WHEN s.is_active = 0 THEN s.id END)
         FROM schedule_items si
         JOIN schedules s ON s.id = si.schedule_id
         WHERE si.subject_id = ?",
        [&subject_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if active + superseded > 0 {
        return err(
            &req.id,
            "conflict",
            "subject is used by a schedule",
            Some(json!({
                "subjectId": subject_id,
                "activeSchedules": active,
                "supersededSchedules": superseded,
            })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: [(&str, &str); 3] = [
        ("lessons", "DELETE FROM lessons WHERE subject_id = ?"),
        ("teacher_subjects", "DELETE FROM teacher_subjects WHERE subject_id = ?"),
        ("subjects", "DELETE FROM subjects WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(subject_id = subject_id.as_str(), "subject deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
