//! Plan application
//!
//! Walks a finished action plan in order, handing each action to an
//! [`ActionExecutor`] and notifying the registered [`PlanHook`]s around it.

mod executor;
mod hooks;

pub use executor::*;
pub use hooks::*;
