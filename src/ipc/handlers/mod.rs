pub mod catalog;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod grading;
pub mod period;
pub mod reports;
pub mod suggestions;
pub mod users;
