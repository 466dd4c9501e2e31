pub mod attendance;
pub mod core;
pub mod courses;
pub mod departments;
pub mod reports;
pub mod students;
pub mod teachers;
