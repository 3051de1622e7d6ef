//! Reads and writes that feed the resolution engine.
//!
//! Everything here materializes engine inputs from the workspace database or
//! persists the administrative edits the engine later reads.

use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db;
use crate::engine::{LessonRecord, RosterTeacher, ScheduleStore, WeeklySchedule};

pub const ROLE_TEACHER: &str = "TEACHER";
pub const ROLE_ADMIN: &str = "ADMIN";

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// All users with role TEACHER in insertion order, with their assignment sets.
pub fn load_roster(conn: &Connection) -> anyhow::Result<Vec<RosterTeacher>> {
    let mut stmt = conn.prepare("SELECT id, name FROM users WHERE role = ? ORDER BY rowid")?;
    let mut teachers = stmt
        .query_map([ROLE_TEACHER], |r| {
            Ok(RosterTeacher {
                id: r.get(0)?,
                name: r.get(1)?,
                class_ids: Vec::new(),
                subject_ids: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut classes =
        load_links(conn, "SELECT teacher_id, class_id FROM teacher_classes ORDER BY rowid")?;
    let mut subjects =
        load_links(conn, "SELECT teacher_id, subject_id FROM teacher_subjects ORDER BY rowid")?;
    for t in &mut teachers {
        t.class_ids = classes.remove(&t.id).unwrap_or_default();
        t.subject_ids = subjects.remove(&t.id).unwrap_or_default();
    }
    Ok(teachers)
}

fn load_links(conn: &Connection, sql: &str) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (owner, target) in rows {
        out.entry(owner).or_default().push(target);
    }
    Ok(out)
}

/// Id and contents of the class's active schedule, if it has one.
pub fn load_active_schedule(
    conn: &Connection,
    class_id: &str,
) -> anyhow::Result<Option<(String, WeeklySchedule)>> {
    let schedule_id: Option<String> = conn
        .query_row(
            "SELECT id FROM schedules WHERE class_id = ? AND is_active = 1",
            [class_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(schedule_id) = schedule_id else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT day_index, subject_id
         FROM schedule_items
         WHERE schedule_id = ?
         ORDER BY day_index, sort_order, rowid",
    )?;
    let entries = stmt
        .query_map([&schedule_id], |r| Ok((r.get::<_, u8>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let schedule = WeeklySchedule::from_entries(entries)
        .with_context(|| format!("schedule {} has malformed items", schedule_id))?;
    Ok(Some((schedule_id, schedule)))
}

pub fn load_schedule_store(
    conn: &Connection,
    class_ids: &[String],
) -> anyhow::Result<ScheduleStore> {
    let mut store = ScheduleStore::new();
    for class_id in class_ids {
        if let Some((_, schedule)) = load_active_schedule(conn, class_id)? {
            store.set_active(class_id.clone(), schedule);
        }
    }
    Ok(store)
}

fn lesson_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LessonRecord> {
    let raw_date: String = r.get(4)?;
    let date = parse_iso_date(&raw_date).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("invalid lesson_date {:?}", raw_date).into(),
        )
    })?;
    Ok(LessonRecord {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: r.get(3)?,
        date,
        unit: r.get(5)?,
        lesson: r.get(6)?,
        objective: r.get(7)?,
        pages: r.get(8)?,
        homework: r.get(9)?,
        comments: r.get(10)?,
    })
}

const LESSON_COLUMNS: &str = "id, teacher_id, class_id, subject_id, lesson_date, \
     unit, lesson, objective, pages, homework, comments";

/// Lessons for one class and calendar day in creation order, the order the
/// submission index relies on for its tie-break.
pub fn load_lessons_for_day(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<LessonRecord>> {
    let sql = format!(
        "SELECT {} FROM lessons WHERE class_id = ? AND lesson_date = ? ORDER BY created_at, rowid",
        LESSON_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![class_id, format_iso_date(date)], lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A teacher's own lessons for the day, limited to subjects they are assigned.
pub fn load_teacher_lessons_for_day(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<LessonRecord>> {
    let sql = format!(
        "SELECT {} FROM lessons l
         WHERE l.teacher_id = ?1 AND l.lesson_date = ?2
           AND EXISTS (
             SELECT 1 FROM teacher_subjects ts
             WHERE ts.teacher_id = ?1 AND ts.subject_id = l.subject_id
           )
         ORDER BY l.lesson_date, l.id",
        LESSON_COLUMNS
            .split(", ")
            .map(|c| format!("l.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![teacher_id, format_iso_date(date)], lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_lesson(conn: &Connection, lesson_id: &str) -> anyhow::Result<Option<LessonRecord>> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLUMNS);
    Ok(conn.query_row(&sql, [lesson_id], lesson_from_row).optional()?)
}

/// Deactivates the class's current schedule and installs a new active one in a
/// single transaction, so readers never see zero or two active schedules.
pub fn replace_active_schedule(
    conn: &Connection,
    class_id: &str,
    name: &str,
    created_by: Option<&str>,
    schedule: &WeeklySchedule,
) -> anyhow::Result<String> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to begin schedule transaction")?;

    let deactivated = tx.execute(
        "UPDATE schedules SET is_active = 0 WHERE class_id = ? AND is_active = 1",
        [class_id],
    )?;

    let schedule_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO schedules(id, class_id, name, is_active, created_by, created_at)
         VALUES(?, ?, ?, 1, ?, ?)",
        params![schedule_id, class_id, name, created_by, db::now_ts()],
    )?;

    {
        let mut insert = tx.prepare(
            "INSERT INTO schedule_items(id, schedule_id, day_index, subject_id, sort_order)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for (day_index, subjects) in schedule.days() {
            for (pos, subject_id) in subjects.iter().enumerate() {
                insert.execute(params![
                    Uuid::new_v4().to_string(),
                    schedule_id,
                    day_index,
                    subject_id,
                    pos as i64
                ])?;
            }
        }
    }

    tx.commit().context("failed to commit schedule")?;
    tracing::info!(
        class_id,
        schedule_id = schedule_id.as_str(),
        deactivated,
        entries = schedule.entry_count(),
        "installed active schedule"
    );
    Ok(schedule_id)
}

pub fn class_ids(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM classes ORDER BY name, id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// `id -> name` for a lookup table (`classes` or `subjects`).
pub fn names_by_id(conn: &Connection, table: &str) -> anyhow::Result<HashMap<String, String>> {
    let sql = format!("SELECT id, name FROM {}", table);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> anyhow::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? LIMIT 1", table);
    let hit: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{resolve, RosterIndex, RowState, SubmissionIndex};

    fn open_temp(prefix: &str) -> Connection {
        let ws = std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()));
        db::open_db(&ws).expect("open db")
    }

    fn seed(conn: &Connection) {
        let ts = db::now_ts();
        conn.execute("INSERT INTO classes(id, name, created_at) VALUES('C1', 'Grade 1', ?)", [&ts])
            .expect("class");
        for s in ["MATH", "ART"] {
            conn.execute(
                "INSERT INTO subjects(id, name, created_at) VALUES(?, ?, ?)",
                params![s, s, ts],
            )
            .expect("subject");
        }
        conn.execute(
            "INSERT INTO users(id, username, name, role, created_at, updated_at)
             VALUES('T1', 't1', 'Teacher One', 'TEACHER', ?1, ?1)",
            [&ts],
        )
        .expect("teacher");
        conn.execute(
            "INSERT INTO users(id, username, name, role, created_at, updated_at)
             VALUES('A1', 'a1', 'Admin', 'ADMIN', ?1, ?1)",
            [&ts],
        )
        .expect("admin");
        conn.execute("INSERT INTO teacher_classes VALUES('T1', 'C1')", []).expect("link");
        conn.execute("INSERT INTO teacher_subjects VALUES('T1', 'MATH')", []).expect("link");
    }

    #[test]
    fn roster_excludes_admins_and_carries_links() {
        let conn = open_temp("planbook-store-roster");
        seed(&conn);
        let roster = load_roster(&conn).expect("roster");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, "T1");
        assert_eq!(roster[0].class_ids, vec!["C1"]);
        assert_eq!(roster[0].subject_ids, vec!["MATH"]);
    }

    #[test]
    fn replacing_schedule_supersedes_previous_one() {
        let conn = open_temp("planbook-store-schedule");
        seed(&conn);
        let first = WeeklySchedule::from_entries([(1, "ART")]).expect("first");
        let second = WeeklySchedule::from_entries([(1, "MATH"), (3, "ART")]).expect("second");
        let old_id =
            replace_active_schedule(&conn, "C1", "Grade 1 Schedule", None, &first).expect("save");
        let new_id =
            replace_active_schedule(&conn, "C1", "Grade 1 Schedule", Some("A1"), &second)
                .expect("save");
        assert_ne!(old_id, new_id);

        let (active_id, active) = load_active_schedule(&conn, "C1").expect("load").expect("active");
        assert_eq!(active_id, new_id);
        assert_eq!(active, second);

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM schedules WHERE class_id = 'C1'", [], |r| r.get(0))
            .expect("count");
        assert_eq!(total, 2);
    }

    #[test]
    fn stored_data_resolves_end_to_end() {
        let conn = open_temp("planbook-store-resolve");
        seed(&conn);
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).expect("date");
        let schedule = WeeklySchedule::from_entries([(1, "MATH"), (1, "ART")]).expect("entries");
        replace_active_schedule(&conn, "C1", "Grade 1 Schedule", None, &schedule).expect("save");
        let ts = db::now_ts();
        conn.execute(
            "INSERT INTO lessons(
               id, teacher_id, class_id, subject_id, lesson_date,
               unit, lesson, objective, pages, created_at, updated_at)
             VALUES('L1', 'T1', 'C1', 'MATH', '2025-03-03', 'u', 'l', 'o', 'p', ?1, ?1)",
            [&ts],
        )
        .expect("lesson");

        let store = load_schedule_store(&conn, &class_ids(&conn).expect("classes")).expect("store");
        let roster = RosterIndex::build(&load_roster(&conn).expect("roster"));
        let subs = SubmissionIndex::for_day(
            "C1",
            monday,
            load_lessons_for_day(&conn, "C1", monday).expect("lessons"),
        );
        let rows = resolve(&store, &roster, &subs, "C1", monday).expect("resolve");
        let states: Vec<RowState> = rows.iter().map(|r| r.state).collect();
        assert_eq!(states, vec![RowState::Submitted, RowState::Unresolvable]);
    }

    #[test]
    fn earliest_created_duplicate_is_matched() {
        let conn = open_temp("planbook-store-duplicates");
        seed(&conn);
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).expect("date");
        let schedule = WeeklySchedule::from_entries([(1, "MATH")]).expect("entries");
        replace_active_schedule(&conn, "C1", "Grade 1 Schedule", None, &schedule).expect("save");
        // BBB is inserted second but created first; CCC ties with BBB and loses on rowid.
        for (id, created_at) in [
            ("AAA", "2025-03-03T09:00:00Z"),
            ("BBB", "2025-03-03T08:00:00Z"),
            ("CCC", "2025-03-03T08:00:00Z"),
        ] {
            conn.execute(
                "INSERT INTO lessons(
                   id, teacher_id, class_id, subject_id, lesson_date,
                   unit, lesson, objective, pages, created_at, updated_at)
                 VALUES(?1, 'T1', 'C1', 'MATH', '2025-03-03', 'u', 'l', 'o', 'p', ?2, ?2)",
                params![id, created_at],
            )
            .expect("lesson");
        }

        let lessons = load_lessons_for_day(&conn, "C1", monday).expect("lessons");
        let ids: Vec<&str> = lessons.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["BBB", "CCC", "AAA"]);

        let store = load_schedule_store(&conn, &class_ids(&conn).expect("classes")).expect("store");
        let roster = RosterIndex::build(&load_roster(&conn).expect("roster"));
        let subs = SubmissionIndex::for_day("C1", monday, lessons);
        assert_eq!(subs.duplicates(), 2);
        let rows = resolve(&store, &roster, &subs, "C1", monday).expect("resolve");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, RowState::Submitted);
        assert_eq!(rows[0].lesson.as_ref().map(|l| l.id.as_str()), Some("BBB"));
    }
}
