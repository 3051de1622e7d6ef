use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A lesson a teacher submitted for one class, subject and calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRecord {
    pub id: String,
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub date: NaiveDate,
    pub unit: String,
    pub lesson: String,
    pub objective: String,
    pub pages: String,
    pub homework: Option<String>,
    pub comments: Option<String>,
}

/// Submissions for one `(class, date)`, keyed by `(teacher, subject)`.
///
/// Tie-break: when several records share a `(teacher, subject)` key, the one
/// that appears first in the input wins and the rest are counted as
/// duplicates. The store feeds records in creation order, so the earliest
/// submission is the one matched.
#[derive(Debug, Clone)]
pub struct SubmissionIndex {
    class_id: String,
    date: NaiveDate,
    by_teacher: HashMap<String, HashMap<String, LessonRecord>>,
    indexed: usize,
    duplicates: usize,
    foreign: usize,
}

impl SubmissionIndex {
    /// Records for another class or date are not indexed.
    pub fn for_day<I>(class_id: &str, date: NaiveDate, records: I) -> Self
    where
        I: IntoIterator<Item = LessonRecord>,
    {
        let mut index = Self {
            class_id: class_id.to_string(),
            date,
            by_teacher: HashMap::new(),
            indexed: 0,
            duplicates: 0,
            foreign: 0,
        };
        for record in records {
            if record.class_id != class_id || record.date != date {
                index.foreign += 1;
                continue;
            }
            let subjects = index
                .by_teacher
                .entry(record.teacher_id.clone())
                .or_default();
            if subjects.contains_key(&record.subject_id) {
                index.duplicates += 1;
                continue;
            }
            subjects.insert(record.subject_id.clone(), record);
            index.indexed += 1;
        }
        if index.duplicates > 0 || index.foreign > 0 {
            tracing::debug!(
                class_id,
                %date,
                duplicates = index.duplicates,
                foreign = index.foreign,
                "submission index skipped records"
            );
        }
        index
    }

    #[allow(dead_code)]
    pub fn empty(class_id: &str, date: NaiveDate) -> Self {
        Self::for_day(class_id, date, std::iter::empty())
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[allow(dead_code)]
    pub fn has_submission(&self, teacher_id: &str, subject_id: &str) -> bool {
        self.get_submission(teacher_id, subject_id).is_some()
    }

    pub fn get_submission(&self, teacher_id: &str, subject_id: &str) -> Option<&LessonRecord> {
        self.by_teacher
            .get(teacher_id)
            .and_then(|subjects| subjects.get(subject_id))
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.indexed
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
