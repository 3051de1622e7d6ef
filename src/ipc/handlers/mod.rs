pub mod assignments;
pub mod classes;
pub mod core;
pub mod lessons;
pub mod schedule;
pub mod setup;
pub mod subjects;
pub mod teachers;
