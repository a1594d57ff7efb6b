//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Command execution with error handling
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `validation` - Input validation helpers

pub mod command;
pub mod io;
pub mod shell;
pub mod validation;
