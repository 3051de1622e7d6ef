use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `Ok(None)` only when the key is absent. A present value that is null, blank
/// or not a string is an `invalid_input` rejection.
pub fn present_id(req: &Request, key: &str) -> Result<Option<String>, JsonValue> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    raw.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| {
            err(
                &req.id,
                "invalid_input",
                format!("{} must be a non-empty string", key),
                Some(serde_json::json!({ "value": raw })),
            )
        })
}

/// `YYYY-MM-DD`; anything else is an `invalid_input` rejection.
pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, JsonValue> {
    let raw = required_str(req, key)?;
    store::parse_iso_date(&raw).ok_or_else(|| {
        err(
            &req.id,
            "invalid_input",
            format!("{} must be an ISO date (YYYY-MM-DD)", key),
            Some(serde_json::json!({ "value": raw })),
        )
    })
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

/// Trimmed, de-duplicated, order-preserving.
pub fn parse_string_array(v: Option<&JsonValue>) -> Result<Vec<String>, &'static str> {
    match v {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v.as_array().ok_or("must be array of strings")?;
            let mut out: Vec<String> = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or("must be array of strings")?
                    .trim()
                    .to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

/// Maps a missing row or lookup failure onto the usual error envelope.
pub fn ensure_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    label: &str,
) -> Result<(), JsonValue> {
    match store::row_exists(conn, table, id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(
            &req.id,
            "not_found",
            format!("{} not found", label),
            Some(serde_json::json!({ "id": id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", format!("{e:#}"), None)),
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
