//! Action execution driver

use crate::disk::actions::{Action, ActionPlan};
use crate::disk::resolve::ResolveTable;
use crate::install::hooks::HookRegistry;
use crate::utils::error::Result;
use tracing::info;

/// Carries out planned actions on the target system
pub trait ActionExecutor {
    fn execute(&mut self, action: &Action, table: &ResolveTable) -> Result<()>;
}

/// Executor that only reports what would be done
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    executed: Vec<String>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of every action seen so far, in order
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl ActionExecutor for DryRunExecutor {
    fn execute(&mut self, action: &Action, _table: &ResolveTable) -> Result<()> {
        info!("[dry-run] Would run: {}", action);
        self.executed.push(action.to_record());
        Ok(())
    }
}

/// Apply `plan` in order. The first error from a hook or from the executor
/// stops the run and is returned unchanged.
pub fn apply_plan<E: ActionExecutor + ?Sized>(
    plan: &ActionPlan,
    table: &ResolveTable,
    executor: &mut E,
    hooks: &mut HookRegistry,
) -> Result<()> {
    info!("Applying {} planned actions", plan.len());
    hooks.before_apply(plan, table)?;

    let total = plan.len();
    for (i, action) in plan.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, total, action);
        hooks.before_action(action, table)?;
        executor.execute(action, table)?;
        hooks.after_action(action, table)?;
    }

    hooks.after_apply(plan, table)?;
    info!("All {} actions applied", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::actions::{BootType, RootFs};
    use crate::disk::builder::{LayoutBuilder, LayoutPlan};
    use crate::disk::layouts::compose_single_disk_layout;
    use crate::disk::uuid_store::UuidStore;
    use crate::install::hooks::PlanHook;
    use crate::utils::error::DiskPlanError;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail_before: Option<&'static str>,
    }

    impl PlanHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn before_apply(&mut self, _plan: &ActionPlan, _table: &ResolveTable) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:start", self.name));
            Ok(())
        }

        fn before_action(&mut self, action: &Action, _table: &ResolveTable) -> Result<()> {
            if let Some(id) = self.fail_before {
                if action.created_id() == Some(id) {
                    return Err(DiskPlanError::Hook {
                        hook: self.name.to_string(),
                        reason: format!("refusing {}", id),
                    });
                }
            }
            self.log
                .borrow_mut()
                .push(format!("{}:before:{}", self.name, action.name()));
            Ok(())
        }

        fn after_apply(&mut self, _plan: &ActionPlan, _table: &ResolveTable) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:done", self.name));
            Ok(())
        }
    }

    struct FailOn {
        action: &'static str,
        seen: usize,
    }

    impl ActionExecutor for FailOn {
        fn execute(&mut self, action: &Action, _table: &ResolveTable) -> Result<()> {
            if action.name() == self.action {
                return Err(DiskPlanError::CommandFailed {
                    command: action.to_string(),
                    stderr: "boom".to_string(),
                });
            }
            self.seen += 1;
            Ok(())
        }
    }

    fn sample_plan(dir: &Path) -> LayoutPlan {
        let mut b = LayoutBuilder::new(UuidStore::new(dir));
        compose_single_disk_layout(&mut b, Path::new("/dev/sda"), None, BootType::Efi, true, RootFs::Ext4)
            .unwrap();
        b.into_plan()
    }

    #[test]
    fn dry_run_sees_every_action_in_order() {
        let dir = TempDir::new().unwrap();
        let plan = sample_plan(dir.path());
        let mut exec = DryRunExecutor::new();
        apply_plan(&plan.actions, &plan.resolve, &mut exec, &mut HookRegistry::new()).unwrap();
        assert_eq!(exec.executed(), plan.actions.to_records().as_slice());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn dry_run_reports_through_tracing() {
        let dir = TempDir::new().unwrap();
        let plan = sample_plan(dir.path());
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let mut exec = DryRunExecutor::new();
        tracing::subscriber::with_default(subscriber, || {
            for action in &plan.actions {
                exec.execute(action, &plan.resolve).unwrap();
            }
        });

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.matches("[dry-run] Would run:").count(), plan.actions.len());
        assert_eq!(exec.executed().len(), plan.actions.len());
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let dir = TempDir::new().unwrap();
        let plan = sample_plan(dir.path());
        let log: Log = Rc::default();

        let mut hooks = HookRegistry::new();
        for name in ["first", "second"] {
            hooks.register(Recorder {
                name,
                log: log.clone(),
                fail_before: None,
            });
        }
        assert_eq!(hooks.names(), vec!["first", "second"]);

        apply_plan(&plan.actions, &plan.resolve, &mut DryRunExecutor::new(), &mut hooks).unwrap();
        let log = log.borrow();
        assert_eq!(log[0], "first:start");
        assert_eq!(log[1], "second:start");
        assert_eq!(log[2], "first:before:create_gpt");
        assert_eq!(log[3], "second:before:create_gpt");
        assert_eq!(log[log.len() - 1], "second:done");
    }

    #[test]
    fn executor_error_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let plan = sample_plan(dir.path());
        let log: Log = Rc::default();
        let mut hooks = HookRegistry::new();
        hooks.register(Recorder {
            name: "rec",
            log: log.clone(),
            fail_before: None,
        });

        let mut exec = FailOn {
            action: "create_luks",
            seen: 0,
        };
        let err = apply_plan(&plan.actions, &plan.resolve, &mut exec, &mut hooks).unwrap_err();
        assert!(matches!(err, DiskPlanError::CommandFailed { .. }));
        // gpt, boot and root partitions ran before the luks action
        assert_eq!(exec.seen, 3);
        assert!(!log.borrow().iter().any(|l| l == "rec:done"));
    }

    #[test]
    fn hook_error_prevents_execution() {
        let dir = TempDir::new().unwrap();
        let plan = sample_plan(dir.path());
        let mut hooks = HookRegistry::new();
        hooks.register(Recorder {
            name: "guard",
            log: Rc::default(),
            fail_before: Some("gpt"),
        });

        let mut exec = DryRunExecutor::new();
        let err = apply_plan(&plan.actions, &plan.resolve, &mut exec, &mut hooks).unwrap_err();
        assert!(matches!(err, DiskPlanError::Hook { hook, .. } if hook == "guard"));
        assert!(exec.executed().is_empty());
    }
}
