use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::error::EngineError;
use super::roster::RosterIndex;
use super::schedule::{check_day_index, ScheduleStore};
use super::submissions::{LessonRecord, SubmissionIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowState {
    Submitted,
    /// A teacher is assigned but nothing was submitted for the day.
    Missing,
    /// No teacher qualifies for the scheduled subject in this class.
    Unresolvable,
}

impl RowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Missing => "missing",
            Self::Unresolvable => "unresolvable",
        }
    }
}

/// One scheduled subject for one class on one date. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRow {
    pub class_id: String,
    pub day_index: u8,
    pub subject_id: String,
    pub teacher_id: Option<String>,
    pub candidates: Vec<String>,
    pub lesson: Option<LessonRecord>,
    pub state: RowState,
}

/// Weekday of a calendar date, 0=Sunday..6=Saturday. The date is taken as is;
/// no timezone conversion happens here.
pub fn day_index_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Resolves every subject scheduled for `class_id` on `date`.
///
/// `submissions` must be the index built for the same class and date.
pub fn resolve(
    schedule: &ScheduleStore,
    roster: &RosterIndex,
    submissions: &SubmissionIndex,
    class_id: &str,
    date: NaiveDate,
) -> Result<Vec<AssignmentRow>, EngineError> {
    if submissions.date() != date {
        return Err(EngineError::invalid(format!(
            "submission index is for {}, not {}",
            submissions.date(),
            date
        )));
    }
    resolve_day(schedule, roster, submissions, class_id, day_index_of(date))
}

pub fn resolve_day(
    schedule: &ScheduleStore,
    roster: &RosterIndex,
    submissions: &SubmissionIndex,
    class_id: &str,
    day_index: u8,
) -> Result<Vec<AssignmentRow>, EngineError> {
    if class_id.trim().is_empty() {
        return Err(EngineError::invalid("class id must not be empty"));
    }
    check_day_index(day_index)?;
    if submissions.class_id() != class_id {
        return Err(EngineError::invalid(format!(
            "submission index is for class {}, not {}",
            submissions.class_id(),
            class_id
        )));
    }
    if day_index_of(submissions.date()) != day_index {
        return Err(EngineError::invalid(format!(
            "submission date {} does not fall on day index {}",
            submissions.date(),
            day_index
        )));
    }

    let subject_ids = schedule.subjects_for_class_on_day(class_id, day_index);
    let mut rows = Vec::with_capacity(subject_ids.len());
    for subject_id in subject_ids {
        let candidates: Vec<String> = roster
            .candidates(class_id, subject_id)
            .into_iter()
            .map(str::to_string)
            .collect();

        let Some(owner) = candidates.first().cloned() else {
            tracing::warn!(
                class_id,
                subject_id = subject_id.as_str(),
                day_index,
                "scheduled subject has no qualifying teacher"
            );
            rows.push(AssignmentRow {
                class_id: class_id.to_string(),
                day_index,
                subject_id: subject_id.clone(),
                teacher_id: None,
                candidates,
                lesson: None,
                state: RowState::Unresolvable,
            });
            continue;
        };

        let lesson = submissions.get_submission(&owner, subject_id).cloned();
        let state = if lesson.is_some() {
            RowState::Submitted
        } else {
            RowState::Missing
        };
        rows.push(AssignmentRow {
            class_id: class_id.to_string(),
            day_index,
            subject_id: subject_id.clone(),
            teacher_id: Some(owner),
            candidates,
            lesson,
            state,
        });
    }

    tracing::debug!(
        class_id,
        day_index,
        rows = rows.len(),
        "resolved assignments"
    );
    Ok(rows)
}

/// Resolves several classes for one date. Each index names its class; output
/// keeps the order of `indexes`.
pub fn resolve_classes(
    schedule: &ScheduleStore,
    roster: &RosterIndex,
    indexes: &[SubmissionIndex],
    date: NaiveDate,
) -> Result<Vec<(String, Vec<AssignmentRow>)>, EngineError> {
    indexes
        .iter()
        .map(|idx| {
            let rows = resolve(schedule, roster, idx, idx.class_id(), date)?;
            Ok((idx.class_id().to_string(), rows))
        })
        .collect()
}
