use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Lessons,
    Schedule,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "lessons" => Some(Self::Lessons),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Lessons => "setup.lessons",
            Self::Schedule => "setup.schedule",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Lessons => json!({
            "restrictEditsToToday": true,
            "requireAssignedSubject": true
        }),
        SetupSection::Schedule => json!({
            "rejectUnstaffedSubjects": false
        }),
    }
}

fn parse_bool_field(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Lessons => match k.as_str() {
                "restrictEditsToToday" | "requireAssignedSubject" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool_field(v, k)?));
                }
                _ => return Err(format!("unknown lessons field: {}", k)),
            },
            SetupSection::Schedule => match k.as_str() {
                "rejectUnstaffedSubjects" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool_field(v, k)?));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a stale key in an old workspace must not block setup.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), %msg, "ignoring malformed saved setup");
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct LessonRules {
    pub restrict_edits_to_today: bool,
    pub require_assigned_subject: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleRules {
    pub reject_unstaffed_subjects: bool,
}

pub fn lesson_rules(conn: &rusqlite::Connection) -> anyhow::Result<LessonRules> {
    let v = load_section(conn, SetupSection::Lessons)?;
    Ok(LessonRules {
        restrict_edits_to_today: v
            .get("restrictEditsToToday")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
        require_assigned_subject: v
            .get("requireAssignedSubject")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
    })
}

pub fn schedule_rules(conn: &rusqlite::Connection) -> anyhow::Result<ScheduleRules> {
    let v = load_section(conn, SetupSection::Schedule)?;
    Ok(ScheduleRules {
        reject_unstaffed_subjects: v
            .get("rejectUnstaffedSubjects")
            .and_then(|x| x.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let lessons = match load_section(conn, SetupSection::Lessons) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let schedule = match load_section(conn, SetupSection::Schedule) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "lessons": lessons,
            "schedule": schedule
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
