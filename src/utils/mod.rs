//! Shared utilities

pub mod command;
pub mod error;
pub mod logging;
