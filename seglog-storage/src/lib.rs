pub mod config;
pub mod memory_log;
pub mod segment;
