pub mod auth;
pub mod volume;
