//! Schedule-to-assignment resolution.
//!
//! Pure functions over in-memory snapshots: the IPC layer loads the active
//! schedules, the roster and the day's lessons, builds the indexes here and
//! asks for assignment rows. Nothing in this module touches storage.

mod error;
mod report;
mod resolver;
mod roster;
mod schedule;
mod submissions;

pub use error::EngineError;
pub use report::{find_missing, MissingReport};
pub use resolver::{day_index_of, resolve, resolve_classes, AssignmentRow, RowState};
pub use roster::{RosterIndex, RosterTeacher};
pub use schedule::{check_day_index, weekday_name, ScheduleStore, WeeklySchedule};
pub use submissions::{LessonRecord, SubmissionIndex};
