pub mod config;
pub mod context;
pub mod job_id;
pub mod logging;
pub mod sanitize;
