use serde::Serialize;

use super::resolver::{AssignmentRow, RowState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingEntry {
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
}

/// A scheduled slot nobody is configured to teach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvableEntry {
    pub class_id: String,
    pub subject_id: String,
    pub day_index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRef {
    pub class_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherMissing {
    pub teacher_id: String,
    pub slots: Vec<SlotRef>,
}

/// Teachers who owe a submission, kept apart from configuration gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingReport {
    pub missing: Vec<MissingEntry>,
    pub unresolvable: Vec<UnresolvableEntry>,
}

impl MissingReport {
    pub fn is_clear(&self) -> bool {
        self.missing.is_empty() && self.unresolvable.is_empty()
    }

    /// Missing slots grouped per teacher, teachers in first-appearance order.
    pub fn by_teacher(&self) -> Vec<TeacherMissing> {
        let mut out: Vec<TeacherMissing> = Vec::new();
        for entry in &self.missing {
            let slot = SlotRef {
                class_id: entry.class_id.clone(),
                subject_id: entry.subject_id.clone(),
            };
            match out.iter_mut().find(|t| t.teacher_id == entry.teacher_id) {
                Some(t) => t.slots.push(slot),
                None => out.push(TeacherMissing {
                    teacher_id: entry.teacher_id.clone(),
                    slots: vec![slot],
                }),
            }
        }
        out
    }
}

/// Splits resolved rows into missing submissions and unresolvable slots.
/// Submitted rows are dropped.
pub fn find_missing<'a, I>(rows: I) -> MissingReport
where
    I: IntoIterator<Item = &'a AssignmentRow>,
{
    let mut report = MissingReport::default();
    for row in rows {
        match (row.state, row.teacher_id.as_ref()) {
            (RowState::Missing, Some(teacher_id)) => report.missing.push(MissingEntry {
                teacher_id: teacher_id.clone(),
                class_id: row.class_id.clone(),
                subject_id: row.subject_id.clone(),
            }),
            (RowState::Unresolvable, _) | (RowState::Missing, None) => {
                report.unresolvable.push(UnresolvableEntry {
                    class_id: row.class_id.clone(),
                    subject_id: row.subject_id.clone(),
                    day_index: row.day_index,
                })
            }
            (RowState::Submitted, _) => {}
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        class_id: &str,
        subject_id: &str,
        teacher_id: Option<&str>,
        state: RowState,
    ) -> AssignmentRow {
        AssignmentRow {
            class_id: class_id.to_string(),
            day_index: 1,
            subject_id: subject_id.to_string(),
            teacher_id: teacher_id.map(str::to_string),
            candidates: teacher_id.map(|t| vec![t.to_string()]).unwrap_or_default(),
            lesson: None,
            state,
        }
    }

    #[test]
    fn missing_and_unresolvable_are_reported_separately() {
        let rows = vec![
            row("C1", "MATH", Some("T1"), RowState::Missing),
            row("C1", "SCI", Some("T2"), RowState::Submitted),
            row("C1", "ART", None, RowState::Unresolvable),
        ];
        let report = find_missing(&rows);
        assert_eq!(
            report.missing,
            vec![MissingEntry {
                teacher_id: "T1".to_string(),
                class_id: "C1".to_string(),
                subject_id: "MATH".to_string(),
            }]
        );
        assert_eq!(report.unresolvable.len(), 1);
        assert_eq!(report.unresolvable[0].subject_id, "ART");
        assert!(!report.is_clear());
    }

    #[test]
    fn all_submitted_is_clear() {
        let rows = vec![row("C1", "MATH", Some("T1"), RowState::Submitted)];
        assert!(find_missing(&rows).is_clear());
    }

    #[test]
    fn grouping_follows_first_appearance() {
        let rows = vec![
            row("C1", "MATH", Some("T2"), RowState::Missing),
            row("C1", "SCI", Some("T1"), RowState::Missing),
            row("C2", "MATH", Some("T2"), RowState::Missing),
        ];
        let grouped = find_missing(&rows).by_teacher();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].teacher_id, "T2");
        assert_eq!(grouped[0].slots.len(), 2);
        assert_eq!(grouped[0].slots[1].class_id, "C2");
        assert_eq!(grouped[1].teacher_id, "T1");
    }
}
