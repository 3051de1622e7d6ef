use serde::Serialize;
use std::collections::HashMap;

use super::error::EngineError;

pub const DAYS_PER_WEEK: usize = 7;

const WEEKDAY_NAMES: [&str; DAYS_PER_WEEK] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Day indexes run 0=Sunday..6=Saturday.
pub fn check_day_index(day_index: u8) -> Result<usize, EngineError> {
    let idx = day_index as usize;
    if idx < DAYS_PER_WEEK {
        Ok(idx)
    } else {
        Err(EngineError::invalid(format!(
            "day index {} is outside 0..=6",
            day_index
        )))
    }
}

pub fn weekday_name(day_index: u8) -> Option<&'static str> {
    WEEKDAY_NAMES.get(day_index as usize).copied()
}

/// Subjects taught on each weekday for one class.
///
/// Each day is an ordered set: a subject appears at most once and keeps the
/// position of its first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeeklySchedule {
    days: [Vec<String>; DAYS_PER_WEEK],
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (u8, S)>,
        S: AsRef<str>,
    {
        let mut schedule = Self::new();
        for (day_index, subject_id) in entries {
            schedule.insert(day_index, subject_id.as_ref())?;
        }
        Ok(schedule)
    }

    /// Returns `false` when the subject was already scheduled that day.
    pub fn insert(&mut self, day_index: u8, subject_id: &str) -> Result<bool, EngineError> {
        let day = check_day_index(day_index)?;
        let slot = &mut self.days[day];
        if slot.iter().any(|s| s == subject_id) {
            return Ok(false);
        }
        slot.push(subject_id.to_string());
        Ok(true)
    }

    pub fn subjects_on(&self, day_index: u8) -> &[String] {
        self.days
            .get(day_index as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// `(day_index, subjects)` for every day, including empty ones.
    pub fn days(&self) -> impl Iterator<Item = (u8, &[String])> + '_ {
        self.days
            .iter()
            .enumerate()
            .map(|(i, subjects)| (i as u8, subjects.as_slice()))
    }

    pub fn entry_count(&self) -> usize {
        self.days.iter().map(|d| d.len()).sum()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}

/// Active weekly schedules keyed by class id. Superseded schedules are never
/// loaded into the store, so a read can only see the active one.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStore {
    active: HashMap<String, WeeklySchedule>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the active schedule for a class, returning the one it replaced.
    pub fn set_active(
        &mut self,
        class_id: impl Into<String>,
        schedule: WeeklySchedule,
    ) -> Option<WeeklySchedule> {
        self.active.insert(class_id.into(), schedule)
    }

    /// Empty when the class has no active schedule or nothing on that day.
    pub fn subjects_for_class_on_day(&self, class_id: &str, day_index: u8) -> &[String] {
        self.active
            .get(class_id)
            .map(|s| s.subjects_on(day_index))
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
