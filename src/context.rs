//! Unit context
//!
//! A unit is one hook or test invocation. Each unit walks
//! `NotStarted -> Running -> Suspended -> Settled`; synchronous bodies skip
//! `Suspended`. The body gets a [`Ctx`] for the assertion object, the
//! timeout setter and bail requests.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use crate::assert::Assert;
use crate::error::{ErrorKind, OspecError};
use crate::state::Shared;

/// Which slot a unit was declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Before,
    After,
    BeforeEach,
    AfterEach,
    Test,
}

impl UnitKind {
    pub fn is_hook(self) -> bool {
        self != UnitKind::Test
    }

    /// Error kind for a non-assertion error raised by this unit
    pub(crate) fn failure_kind(self) -> ErrorKind {
        if self.is_hook() {
            ErrorKind::HookFailure
        } else {
            ErrorKind::TestFailure
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitKind::Before => "before",
            UnitKind::After => "after",
            UnitKind::BeforeEach => "beforeEach",
            UnitKind::AfterEach => "afterEach",
            UnitKind::Test => "test",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    NotStarted,
    /// Executing its first turn; the timeout setter is allowed
    Running,
    /// Yielded at least once; the timeout setter is rejected
    Suspended,
    Settled,
}

/// Per-unit bookkeeping shared between the scheduler and the unit's `Ctx`
#[derive(Debug)]
pub(crate) struct UnitCell {
    kind: UnitKind,
    label: String,
    phase: Cell<UnitPhase>,
    timeout_override: Cell<Option<Duration>>,
}

impl UnitCell {
    pub(crate) fn new(kind: UnitKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            phase: Cell::new(UnitPhase::NotStarted),
            timeout_override: Cell::new(None),
        }
    }

    pub(crate) fn kind(&self) -> UnitKind {
        self.kind
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn phase(&self) -> UnitPhase {
        self.phase.get()
    }

    pub(crate) fn start(&self) {
        debug_assert_eq!(self.phase(), UnitPhase::NotStarted);
        self.phase.set(UnitPhase::Running);
    }

    pub(crate) fn suspend(&self) {
        if self.phase() == UnitPhase::Running {
            self.phase.set(UnitPhase::Suspended);
        }
    }

    pub(crate) fn settle(&self) {
        self.phase.set(UnitPhase::Settled);
    }

    pub(crate) fn override_timeout(&self, limit: Duration) {
        self.timeout_override.set(Some(limit));
    }

    pub(crate) fn timeout_override(&self) -> Option<Duration> {
        self.timeout_override.get()
    }
}

/// Handle passed to every hook and test body
#[derive(Clone)]
pub struct Ctx {
    unit: Rc<UnitCell>,
    shared: Rc<Shared>,
    assert: Rc<Assert>,
}

impl Ctx {
    pub(crate) fn new(unit: Rc<UnitCell>, shared: Rc<Shared>, assert: Assert) -> Self {
        Self {
            unit,
            shared,
            assert: Rc::new(assert),
        }
    }

    /// Name of the running test, or the hook label
    pub fn name(&self) -> &str {
        self.unit.label()
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    pub fn phase(&self) -> UnitPhase {
        self.unit.phase()
    }

    /// The assertion object from the nearest `assert_with` factory
    pub fn assert(&self) -> &Assert {
        &self.assert
    }

    /// Override this unit's timeout.
    ///
    /// Must be called before the body's first `.await` that suspends.
    /// Later calls, or calls through a context whose unit is no longer
    /// running, fail with `ErrorKind::Misuse` and abort the run.
    pub fn timeout(&self, limit: Duration) -> Result<(), OspecError> {
        self.shared.set_timeout(&self.unit, limit)
    }

    /// Stop starting new work; `after` hooks of entered groups still run.
    pub fn bail(&self) {
        tracing::info!(unit = self.name(), "bail requested");
        self.shared.request_bail();
    }

    pub fn is_bailed(&self) -> bool {
        self.shared.bailed()
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("phase", &self.phase())
            .finish()
    }
}
