pub mod assignments;
pub mod auth;
pub mod core;
pub mod dashboard;
pub mod data;
pub mod forums;
pub mod messages;
pub mod users;
