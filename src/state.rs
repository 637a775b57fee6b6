//! Run state
//!
//! Holds the mutable context threaded through one traversal: nesting depth,
//! the file label of the running test, the active unit, the bail flag, the
//! count of timed-out bodies still pending, and the execution log.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use crate::context::{UnitCell, UnitPhase};
use crate::error::OspecError;

/// The part of the run state that unit contexts and detached bodies can reach
#[derive(Default)]
pub(crate) struct Shared {
    bail: Cell<bool>,
    bail_raised: Cell<bool>,
    active: RefCell<Option<Rc<UnitCell>>>,
    pending: Cell<usize>,
    misuse: RefCell<Option<OspecError>>,
}

impl Shared {
    pub(crate) fn bailed(&self) -> bool {
        self.bail.get()
    }

    pub(crate) fn request_bail(&self) {
        self.bail.set(true);
        self.bail_raised.set(true);
    }

    /// Whether bail was ever requested, even if a group-scoped bail was cleared since
    pub(crate) fn bail_raised(&self) -> bool {
        self.bail_raised.get()
    }

    pub(crate) fn clear_bail(&self) {
        self.bail.set(false);
    }

    /// Number of timed-out bodies that have not settled yet
    pub(crate) fn pending(&self) -> usize {
        self.pending.get()
    }

    pub(crate) fn timed_out_pending(&self) {
        self.pending.set(self.pending.get() + 1);
    }

    pub(crate) fn settled_late(&self) {
        self.pending.set(self.pending.get().saturating_sub(1));
    }

    /// The timeout setter. Only the active unit may call it, and only
    /// before its first suspension.
    pub(crate) fn set_timeout(&self, caller: &Rc<UnitCell>, limit: Duration) -> Result<(), OspecError> {
        let is_active = self
            .active
            .borrow()
            .as_ref()
            .map_or(false, |unit| Rc::ptr_eq(unit, caller));

        let result = match caller.phase() {
            UnitPhase::Running if is_active => {
                caller.override_timeout(limit);
                Ok(())
            }
            UnitPhase::Suspended if is_active => Err(OspecError::misuse(format!(
                "`timeout()` called by {:?} after it suspended; it must be called before the first await",
                caller.label(),
            ))),
            _ => Err(OspecError::misuse(format!(
                "`timeout()` called by {:?} outside its own execution; it must be called synchronously from within a test or hook",
                caller.label(),
            ))),
        };

        if let Err(ref e) = result {
            tracing::error!(unit = caller.label(), "{}", e.message);
            self.record_misuse(e.clone());
        }
        result
    }

    /// Keep the first misuse; the run surfaces it once the current unit ends.
    pub(crate) fn record_misuse(&self, err: OspecError) {
        let mut slot = self.misuse.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take_misuse(&self) -> Option<OspecError> {
        self.misuse.borrow_mut().take()
    }

    fn set_active(&self, unit: Option<Rc<UnitCell>>) {
        *self.active.borrow_mut() = unit;
    }
}

/// Mutable state for a single run
pub(crate) struct RunnerState {
    /// Current nesting level (root group = 1)
    pub depth: usize,
    /// `file:line` label of the test currently executing
    pub current_file: Option<String>,
    /// Execution log
    pub log: String,
    shared: Rc<Shared>,
}

impl RunnerState {
    pub(crate) fn new() -> Self {
        Self {
            depth: 0,
            current_file: None,
            log: String::new(),
            shared: Rc::new(Shared::default()),
        }
    }

    pub(crate) fn shared(&self) -> &Rc<Shared> {
        &self.shared
    }

    pub(crate) fn bailed(&self) -> bool {
        self.shared.bailed()
    }

    /// Make `unit` the active unit and move it to `Running`
    pub(crate) fn activate(&mut self, unit: &Rc<UnitCell>) {
        unit.start();
        self.shared.set_active(Some(unit.clone()));
    }

    /// Settle the active unit; nothing is active afterwards
    pub(crate) fn deactivate(&mut self, unit: &Rc<UnitCell>) {
        unit.settle();
        self.shared.set_active(None);
    }

    /// Write a log entry, indented by the current depth
    pub(crate) fn logf(&mut self, msg: &str) {
        for _ in 1..self.depth {
            self.log.push_str("  ");
        }
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UnitKind;
    use crate::error::ErrorKind;

    fn unit(label: &str) -> Rc<UnitCell> {
        Rc::new(UnitCell::new(UnitKind::Test, label))
    }

    #[test]
    fn test_timeout_setter_while_running() {
        let mut state = RunnerState::new();
        let u = unit("a");
        state.activate(&u);
        state.shared().set_timeout(&u, Duration::from_millis(900)).unwrap();
        assert_eq!(u.timeout_override(), Some(Duration::from_millis(900)));
        assert!(state.shared().take_misuse().is_none());
    }

    #[test]
    fn test_timeout_setter_after_suspension() {
        let mut state = RunnerState::new();
        let u = unit("a");
        state.activate(&u);
        u.suspend();
        let err = state.shared().set_timeout(&u, Duration::from_millis(5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Misuse);
        assert!(err.message.contains("after it suspended"));
        assert_eq!(u.timeout_override(), None);
        assert!(state.shared().take_misuse().is_some());
    }

    #[test]
    fn test_timeout_setter_from_inactive_unit() {
        let mut state = RunnerState::new();
        let first = unit("first");
        let second = unit("second");
        state.activate(&first);
        state.deactivate(&first);
        state.activate(&second);
        let err = state.shared().set_timeout(&first, Duration::from_millis(5)).unwrap_err();
        assert!(err.message.contains("outside its own execution"));
        assert_eq!(second.timeout_override(), None);
    }

    #[test]
    fn test_first_misuse_is_kept() {
        let shared = Shared::default();
        shared.record_misuse(OspecError::misuse("one"));
        shared.record_misuse(OspecError::misuse("two"));
        assert_eq!(shared.take_misuse().unwrap().message, "one");
        assert!(shared.take_misuse().is_none());
    }

    #[test]
    fn test_cleared_bail_is_still_remembered() {
        let shared = Shared::default();
        shared.request_bail();
        shared.clear_bail();
        assert!(!shared.bailed());
        assert!(shared.bail_raised());
    }

    #[test]
    fn test_pending_counter() {
        let shared = Shared::default();
        shared.timed_out_pending();
        shared.timed_out_pending();
        assert_eq!(shared.pending(), 2);
        shared.settled_late();
        shared.settled_late();
        shared.settled_late();
        assert_eq!(shared.pending(), 0);
    }

    #[test]
    fn test_logf_indents_by_depth() {
        let mut state = RunnerState::new();
        state.depth = 1;
        state.logf("root");
        state.depth = 3;
        state.logf("leaf\n");
        assert_eq!(state.log, "root\n    leaf\n");
    }
}
