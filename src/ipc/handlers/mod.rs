pub mod auth;
pub mod config;
pub mod core;
pub mod programs;
pub mod reports;
pub mod rooms;
pub mod slots;
pub mod subjects;
pub mod teachers;
