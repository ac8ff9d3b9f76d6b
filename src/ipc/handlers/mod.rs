pub mod comments;
pub mod core;
pub mod reports;
pub mod results;
pub mod schools;
pub mod setup;
pub mod students;
