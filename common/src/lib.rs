pub mod exec;
pub mod facts;
pub mod types;
