use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One teacher as the store returns it: two independent assignment sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterTeacher {
    pub id: String,
    pub name: String,
    pub class_ids: Vec<String>,
    pub subject_ids: Vec<String>,
}

/// Lookups derived from the roster for a single resolution run.
///
/// A teacher is responsible for `(class, subject)` only when both ids appear in
/// their assignment sets. Subject lists keep roster input order so owner
/// selection is stable.
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    teachers_by_subject: HashMap<String, Vec<String>>,
    subjects_by_teacher: HashMap<String, HashSet<String>>,
    classes_by_teacher: HashMap<String, HashSet<String>>,
    names: HashMap<String, String>,
    order: Vec<String>,
}

impl RosterIndex {
    pub fn build(teachers: &[RosterTeacher]) -> Self {
        let mut index = Self::default();
        for t in teachers {
            if !index.names.contains_key(&t.id) {
                index.names.insert(t.id.clone(), t.name.clone());
                index.order.push(t.id.clone());
            }
            index
                .classes_by_teacher
                .entry(t.id.clone())
                .or_default()
                .extend(t.class_ids.iter().cloned());
            let subjects = index.subjects_by_teacher.entry(t.id.clone()).or_default();
            for subject_id in &t.subject_ids {
                subjects.insert(subject_id.clone());
                let owners = index
                    .teachers_by_subject
                    .entry(subject_id.clone())
                    .or_default();
                if !owners.contains(&t.id) {
                    owners.push(t.id.clone());
                }
            }
        }
        index
    }

    pub fn teachers_for_subject(&self, subject_id: &str) -> &[String] {
        self.teachers_by_subject
            .get(subject_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn subjects_for_teacher(&self, teacher_id: &str) -> Option<&HashSet<String>> {
        self.subjects_by_teacher.get(teacher_id)
    }

    pub fn classes_for_teacher(&self, teacher_id: &str) -> Option<&HashSet<String>> {
        self.classes_by_teacher.get(teacher_id)
    }

    pub fn teaches(&self, teacher_id: &str, class_id: &str, subject_id: &str) -> bool {
        let in_class = self
            .classes_for_teacher(teacher_id)
            .is_some_and(|c| c.contains(class_id));
        let has_subject = self
            .subjects_for_teacher(teacher_id)
            .is_some_and(|s| s.contains(subject_id));
        in_class && has_subject
    }

    /// Every teacher qualified for the pair, in roster order.
    pub fn candidates(&self, class_id: &str, subject_id: &str) -> Vec<&str> {
        self.teachers_for_subject(subject_id)
            .iter()
            .filter(|t| {
                self.classes_for_teacher(t)
                    .is_some_and(|c| c.contains(class_id))
            })
            .map(|t| t.as_str())
            .collect()
    }

    /// First qualifying teacher; `None` means the pair is unassigned.
    pub fn owner(&self, class_id: &str, subject_id: &str) -> Option<&str> {
        self.candidates(class_id, subject_id).into_iter().next()
    }

    pub fn teacher_name(&self, teacher_id: &str) -> Option<&str> {
        self.names.get(teacher_id).map(|n| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
