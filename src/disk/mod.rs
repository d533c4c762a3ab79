//! Disk layout planning and device resolution

pub mod actions;
pub mod builder;
pub mod layouts;
pub mod probe;
pub mod registry;
pub mod resolve;
pub mod resolver;
pub mod summary;
pub mod uuid_store;
