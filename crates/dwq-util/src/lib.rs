//! Functionality that is convenient for the client, worker, and management
//! tool, but which isn't specific to any one of them.

pub mod config;
pub mod fs;
pub mod log;
pub mod process;
pub mod token;
