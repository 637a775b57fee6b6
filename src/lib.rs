//! ospec: a minimalist spec-tree test engine
//!
//! # Overview
//!
//! Suites are declared as a tree of named groups. Each group holds ordered
//! `before`/`after` hooks (run once around the group), `beforeEach`/`afterEach`
//! hooks (run around every test below it, at any depth), an optional default
//! timeout and assertion factory, and ordered children: tests and nested
//! groups. The scheduler walks the tree once, depth first, and produces a
//! report tree mirroring the suite.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ospec::{Spec, runner};
//!
//! let mut root = Spec::new();
//! root.before(|_| Ok(()));
//! root.group("math", |g| {
//!     g.timeout(Duration::from_millis(50));
//!     g.before_each(|_| Ok(()));
//!     g.test("adds", |o| Ok(o.assert().eq(&(2 + 3), &5)?))?;
//!     g.test_async("waits", |o| async move {
//!         o.timeout(Duration::from_millis(500))?;
//!         tokio::time::sleep(Duration::from_millis(100)).await;
//!         Ok(())
//!     })
//! })?;
//!
//! let report = runner().bail(true).run_blocking(root)?;
//! assert!(report.exit_ok());
//! ```
//!
//! # Ordering
//!
//! | Step | What runs |
//! |------|-----------|
//! | enter group | its `before` hooks, in order |
//! | each test | every ancestor's `beforeEach`, outermost first; the body; every ancestor's `afterEach`, innermost first |
//! | each nested group | the same, recursively |
//! | leave group | its `after` hooks, in order, even after bail |
//!
//! # Timeouts
//!
//! An async body is raced against the nearest timeout set on its group or an
//! ancestor, else the run's default (200ms). A body that loses is reported
//! `Timeout` and left running in the background; the report tells whether it
//! settled before the drain window closed. `Ctx::timeout` overrides the limit
//! for the calling unit only, and only before its first suspension.

mod error;
mod stack;
mod assert;
mod context;
mod spec;
mod state;
mod engine;
mod report;
mod runner;

pub use error::{OspecError, ErrorKind};
pub use stack::{StackLabeler, caller_frame, file_of};
pub use assert::{Assert, AssertFactory};
pub use context::{Ctx, UnitKind, UnitPhase};
pub use spec::{Spec, BodyResult};
pub use report::{Report, GroupReport, TestReport, ReportNode, Status, Counts, HookFailure};
pub use runner::{Runner, RunnerBuilder, RunConfig, BailScope, DEFAULT_TIMEOUT, DEFAULT_DRAIN_TIMEOUT};

// Convenience functions for cargo test integration
pub use runner::{run_and_assert, run_and_assert_with, runner};
