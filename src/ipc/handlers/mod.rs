pub mod backup_exchange;
pub mod core;
pub mod dashboard;
pub mod directory;
pub mod grades;
pub mod projects;
pub mod review;
