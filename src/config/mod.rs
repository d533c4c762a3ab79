//! Configuration management

mod layout;

pub use layout::*;
