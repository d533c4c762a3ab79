//! Extension points around plan application

use crate::disk::actions::{Action, ActionPlan};
use crate::disk::resolve::ResolveTable;
use crate::utils::error::Result;
use tracing::debug;

/// Callbacks invoked while a plan is applied. Every method defaults to a
/// no-op, so a hook only implements the points it cares about. Returning an
/// error aborts the application.
pub trait PlanHook {
    fn name(&self) -> &str;

    fn before_apply(&mut self, _plan: &ActionPlan, _table: &ResolveTable) -> Result<()> {
        Ok(())
    }

    fn before_action(&mut self, _action: &Action, _table: &ResolveTable) -> Result<()> {
        Ok(())
    }

    fn after_action(&mut self, _action: &Action, _table: &ResolveTable) -> Result<()> {
        Ok(())
    }

    fn after_apply(&mut self, _plan: &ActionPlan, _table: &ResolveTable) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of hooks; hooks run in registration order
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn PlanHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl PlanHook + 'static) {
        debug!("Registered plan hook '{}'", hook.name());
        self.hooks.push(Box::new(hook));
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn before_apply(&mut self, plan: &ActionPlan, table: &ResolveTable) -> Result<()> {
        self.hooks.iter_mut().try_for_each(|h| h.before_apply(plan, table))
    }

    pub(crate) fn before_action(&mut self, action: &Action, table: &ResolveTable) -> Result<()> {
        self.hooks.iter_mut().try_for_each(|h| h.before_action(action, table))
    }

    pub(crate) fn after_action(&mut self, action: &Action, table: &ResolveTable) -> Result<()> {
        self.hooks.iter_mut().try_for_each(|h| h.after_action(action, table))
    }

    pub(crate) fn after_apply(&mut self, plan: &ActionPlan, table: &ResolveTable) -> Result<()> {
        self.hooks.iter_mut().try_for_each(|h| h.after_apply(plan, table))
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}
