use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_exists, is_unique_violation, optional_str, parse_opt_string,
    parse_string_array, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ROLE_ADMIN, ROLE_TEACHER};
use rusqlite::{params, Connection, Transaction};
use serde_json::json;
use uuid::Uuid;

fn parse_role(raw: Option<String>) -> Result<String, String> {
    let role = raw.unwrap_or_else(|| ROLE_TEACHER.to_string()).to_ascii_uppercase();
    if role == ROLE_TEACHER || role == ROLE_ADMIN {
        Ok(role)
    } else {
        Err(format!("role must be one of: {}, {}", ROLE_TEACHER, ROLE_ADMIN))
    }
}

/// Every id must name an existing row in `table`.
fn check_ids(
    conn: &Connection,
    req: &Request,
    table: &str,
    ids: &[String],
) -> Result<(), serde_json::Value> {
    for id in ids {
        match store::row_exists(conn, table, id) {
            Ok(true) => {}
            Ok(false) => {
                return Err(err(
                    &req.id,
                    "not_found",
                    format!("unknown id in {}", table),
                    Some(json!({ "table": table, "id": id })),
                ))
            }
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        }
    }
    Ok(())
}

/// Replaces a teacher's links in one of the two join tables.
fn set_links(
    tx: &Transaction<'_>,
    table: &str,
    column: &str,
    teacher_id: &str,
    ids: &[String],
) -> rusqlite::Result<()> {
    tx.execute(
        &format!("DELETE FROM {} WHERE teacher_id = ?", table),
        [teacher_id],
    )?;
    let sql = format!("INSERT INTO {}(teacher_id, {}) VALUES(?, ?)", table, column);
    let mut stmt = tx.prepare(&sql)?;
    for id in ids {
        stmt.execute(params![teacher_id, id])?;
    }
    Ok(())
}

fn teacher_json(teacher: &crate::engine::RosterTeacher, username: &str) -> serde_json::Value {
    json!({
        "id": teacher.id,
        "username": username,
        "name": teacher.name,
        "role": ROLE_TEACHER,
        "classIds": teacher.class_ids,
        "subjectIds": teacher.subject_ids,
    })
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let roster = match store::load_roster(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let usernames = {
        let mut stmt = match conn.prepare("SELECT id, username FROM users") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<std::collections::HashMap<_, _>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    let teachers: Vec<serde_json::Value> = roster
        .iter()
        .map(|t| teacher_json(t, usernames.get(&t.id).map(|s| s.as_str()).unwrap_or("")))
        .collect();
    ok(&req.id, json!({ "teachers": teachers }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match parse_role(optional_str(req, "role")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let class_ids = match parse_string_array(req.params.get("classIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("classIds {}", m), None),
    };
    let subject_ids = match parse_string_array(req.params.get("subjectIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("subjectIds {}", m), None),
    };
    if let Err(e) = check_ids(conn, req, "classes", &class_ids) {
        return e;
    }
    if let Err(e) = check_ids(conn, req, "subjects", &subject_ids) {
        return e;
    }

    let teacher_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let ts = db::now_ts();
    match tx.execute(
        "INSERT INTO users(id, username, name, role, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![teacher_id, username, name, role, ts, ts],
    ) {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            let _ = tx.rollback();
            return err(&req.id, "conflict", "username already exists", None);
        }
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            );
        }
    }
    if let Err(e) = set_links(&tx, "teacher_classes", "class_id", &teacher_id, &class_ids)
        .and_then(|_| set_links(&tx, "teacher_subjects", "subject_id", &teacher_id, &subject_ids))
    {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        teacher_id = teacher_id.as_str(),
        role = role.as_str(),
        classes = class_ids.len(),
        subjects = subject_ids.len(),
        "user created"
    );
    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "username": username,
            "name": name,
            "role": role,
            "classIds": class_ids,
            "subjectIds": subject_ids,
        }),
    )
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    if let Err(e) = ensure_exists(conn, req, "users", &teacher_id, "teacher") {
        return e;
    }

    let username = match parse_opt_string(patch.get("username")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("username {}", m), None),
    };
    let name = match parse_opt_string(patch.get("name")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("name {}", m), None),
    };
    // Absent means "leave as is"; an explicit array (even empty) replaces the set.
    let class_ids = match patch.get("classIds") {
        None => None,
        Some(v) => match parse_string_array(Some(v)) {
            Ok(ids) => Some(ids),
            Err(m) => return err(&req.id, "bad_params", format!("classIds {}", m), None),
        },
    };
    let subject_ids = match patch.get("subjectIds") {
        None => None,
        Some(v) => match parse_string_array(Some(v)) {
            Ok(ids) => Some(ids),
            Err(m) => return err(&req.id, "bad_params", format!("subjectIds {}", m), None),
        },
    };
    if let Some(ids) = class_ids.as_ref() {
        if let Err(e) = check_ids(conn, req, "classes", ids) {
            return e;
        }
    }
    if let Some(ids) = subject_ids.as_ref() {
        if let Err(e) = check_ids(conn, req, "subjects", ids) {
            return e;
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Some(username) = username.as_ref() {
        match tx.execute(
            "UPDATE users SET username = ? WHERE id = ?",
            params![username, teacher_id],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                let _ = tx.rollback();
                return err(&req.id, "conflict", "username already exists", None);
            }
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    if let Some(name) = name.as_ref() {
        if let Err(e) = tx.execute(
            "UPDATE users SET name = ? WHERE id = ?",
            params![name, teacher_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(ids) = class_ids.as_ref() {
        if let Err(e) = set_links(&tx, "teacher_classes", "class_id", &teacher_id, ids) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(ids) = subject_ids.as_ref() {
        if let Err(e) = set_links(&tx, "teacher_subjects", "subject_id", &teacher_id, ids) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.execute(
        "UPDATE users SET updated_at = ? WHERE id = ?",
        params![db::now_ts(), teacher_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Both relations feed the roster index, which is rebuilt on every resolution.
    tracing::info!(teacher_id = teacher_id.as_str(), "teacher updated");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "users", &teacher_id, "teacher") {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: [(&str, &str); 4] = [
        ("lessons", "DELETE FROM lessons WHERE teacher_id = ?"),
        ("teacher_classes", "DELETE FROM teacher_classes WHERE teacher_id = ?"),
        ("teacher_subjects", "DELETE FROM teacher_subjects WHERE teacher_id = ?"),
        ("users", "DELETE FROM users WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&teacher_id]) {
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

    tracing::info!(teacher_id = teacher_id.as_str(), "teacher deleted");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name
         FROM classes c
         JOIN teacher_classes tc ON tc.class_id = c.id
         WHERE tc.teacher_id = ?
         ORDER BY c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.classes" => Some(handle_teachers_classes(state, req)),
        _ => None,
    }
}
