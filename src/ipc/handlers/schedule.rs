use crate::engine::{EngineError, RosterIndex, WeeklySchedule, weekday_name};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::setup::schedule_rules;
use crate::ipc::helpers::{db_conn, ensure_exists, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::OptionalExtension;
use serde_json::{json, Map, Value};

fn days_json(schedule: &WeeklySchedule) -> Value {
    let mut days = Map::new();
    for (day_index, subjects) in schedule.days() {
        days.insert(day_index.to_string(), json!(subjects));
    }
    Value::Object(days)
}

/// `{"1": ["MATH", "ART"], ...}` into a weekly schedule. Keys are day indexes.
fn parse_days(raw: &Map<String, Value>) -> Result<WeeklySchedule, EngineError> {
    let mut schedule = WeeklySchedule::new();
    let mut keys: Vec<(u8, &Value)> = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let day_index: u8 = key
            .trim()
            .parse()
            .map_err(|_| EngineError::invalid(format!("day key {:?} is not a day index", key)))?;
        keys.push((day_index, value));
    }
    keys.sort_by_key(|(d, _)| *d);
    for (day_index, value) in keys {
        let subjects = value.as_array().ok_or_else(|| {
            EngineError::invalid(format!("day {} must be an array of subject ids", day_index))
        })?;
        for subject in subjects {
            let Some(subject_id) = subject.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return Err(EngineError::invalid(format!(
                    "day {} has a blank or non-string subject id",
                    day_index
                )));
            };
            schedule.insert(day_index, subject_id)?;
        }
    }
    Ok(schedule)
}

fn handle_schedule_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "classes", &class_id, "class") {
        return e;
    }
    match store::load_active_schedule(conn, &class_id) {
        Ok(Some((schedule_id, schedule))) => ok(
            &req.id,
            json!({
                "classId": class_id,
                "scheduleId": schedule_id,
                "days": days_json(&schedule),
            }),
        ),
        Ok(None) => ok(
            &req.id,
            json!({
                "classId": class_id,
                "scheduleId": Value::Null,
                "days": days_json(&WeeklySchedule::new()),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_schedule_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(days_raw) = req.params.get("days").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "days must be an object", None);
    };
    let created_by = optional_str(req, "createdBy");

    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(
            &req.id,
            "not_found",
            "class not found",
            Some(json!({ "id": class_id })),
        );
    };
    if let Some(user_id) = created_by.as_deref() {
        if let Err(e) = ensure_exists(conn, req, "users", user_id, "user") {
            return e;
        }
    }

    let schedule = match parse_days(days_raw) {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, &e),
    };

    let mut checked: Vec<&str> = Vec::new();
    for (_, subjects) in schedule.days() {
        for subject_id in subjects {
            if checked.contains(&subject_id.as_str()) {
                continue;
            }
            if let Err(e) = ensure_exists(conn, req, "subjects", subject_id, "subject") {
                return e;
            }
            checked.push(subject_id);
        }
    }

    let rules = match schedule_rules(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    if rules.reject_unstaffed_subjects {
        let roster = match store::load_roster(conn) {
            Ok(t) => RosterIndex::build(&t),
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
        };
        for (day_index, subjects) in schedule.days() {
            for subject_id in subjects {
                if roster.owner(&class_id, subject_id).is_none() {
                    return err(
                        &req.id,
                        "bad_params",
                        format!(
                            "no teacher is assigned to {} for this class ({})",
                            subject_id,
                            weekday_name(day_index).unwrap_or("?")
                        ),
                        Some(json!({ "subjectId": subject_id, "dayIndex": day_index })),
                    );
                }
            }
        }
    }

    let name = format!("{} Schedule", class_name);
    match store::replace_active_schedule(conn, &class_id, &name, created_by.as_deref(), &schedule) {
        Ok(schedule_id) => ok(
            &req.id,
            json!({
                "scheduleId": schedule_id,
                "name": name,
                "entryCount": schedule.entry_count(),
            }),
        ),
        Err(e) => err(&req.id, "db_update_failed", format!("{e:#}"), None),
    }
}

fn handle_schedule_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.is_active,
           s.created_by,
           s.created_at,
           (SELECT COUNT(*) FROM schedule_items si WHERE si.schedule_id = s.id) AS item_count
         FROM schedules s
         WHERE s.class_id = ?
         ORDER BY s.created_at DESC, s.rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let is_active: i64 = r.get(2)?;
            Ok(json!({
                "scheduleId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "isActive": is_active != 0,
                "createdBy": r.get::<_, Option<String>>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "itemCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schedules) => ok(&req.id, json!({ "schedules": schedules })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schedule_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let schedule_id = match required_str(req, "scheduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "schedules", &schedule_id, "schedule") {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: [(&str, &str); 2] = [
        ("schedule_items", "DELETE FROM schedule_items WHERE schedule_id = ?"),
        ("schedules", "DELETE FROM schedules WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&schedule_id]) {
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

    tracing::info!(schedule_id = schedule_id.as_str(), "schedule deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.get" => Some(handle_schedule_get(state, req)),
        "schedule.save" => Some(handle_schedule_save(state, req)),
        "schedule.history" => Some(handle_schedule_history(state, req)),
        "schedule.delete" => Some(handle_schedule_delete(state, req)),
        _ => None,
    }
}
