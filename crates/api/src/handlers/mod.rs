pub mod internal;
pub mod jobs;
pub mod models;
pub mod users;
