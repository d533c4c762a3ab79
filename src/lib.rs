//! diskplan library - disk layout planning for unattended installs
//!
//! Layouts are described with stable identifiers, turned into an ordered
//! action plan by [`LayoutBuilder`], and resolved back to device paths with
//! [`DeviceResolver`] once the actions have run.

pub mod config;
pub mod disk;
pub mod install;
pub mod utils;

pub use config::{LayoutConfig, LayoutRecipe};
pub use disk::actions::{Action, ActionPlan};
pub use disk::builder::{LayoutBuilder, LayoutPlan};
pub use disk::resolve::{Locator, ResolveTable};
pub use disk::resolver::{DevicePaths, DeviceResolver};
pub use install::{apply_plan, ActionExecutor, HookRegistry, PlanHook};
pub use utils::error::{DiskPlanError, Result};
