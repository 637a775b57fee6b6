//! Scheduler
//!
//! Walks a spec tree once, depth first. For a group: `before` hooks, then
//! each child in declaration order, then `after` hooks. Around each test the
//! `beforeEach` hooks of every enclosing group run outermost first and the
//! `afterEach` hooks innermost first.
//!
//! Exactly one unit runs at a time. Asynchronous bodies are raced against
//! their resolved timeout; a body that loses the race is not cancelled but
//! moved to a local task that keeps driving it until it settles, so the run
//! can tell when all background work has drained.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::Poll;
use std::time::{Duration, Instant};
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, warn};
use crate::assert::{Assert, AssertFactory};
use crate::context::{Ctx, UnitCell, UnitKind};
use crate::error::OspecError;
use crate::report::{GroupReport, HookFailure, ReportNode, Status, TestReport};
use crate::runner::{BailScope, RunConfig};
use crate::spec::{BodyResult, Child, Hooks, Node, Spec, Started, Test};
use crate::stack::file_of;
use crate::state::{RunnerState, Shared};

/// An async body wrapped so that panics surface as values
type Guarded = LocalBoxFuture<'static, std::thread::Result<BodyResult>>;

/// Lexical view of a group while it runs; `parent` links lead to the root.
struct Scope<'a> {
    hooks: &'a Hooks,
    timeout: Option<Duration>,
    /// Nearest factory on the way to the root
    factory: Option<&'a AssertFactory>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn resolve_timeout(&self, fallback: Duration) -> Duration {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(limit) = s.timeout {
                return limit;
            }
            scope = s.parent;
        }
        fallback
    }

    /// Hook lists from the root down to this group
    fn lineage(&self) -> Vec<&'a Hooks> {
        let mut chain = vec![self.hooks];
        let mut scope = self.parent;
        while let Some(s) = scope {
            chain.push(s.hooks);
            scope = s.parent;
        }
        chain.reverse();
        chain
    }
}

struct UnitOutcome {
    result: Result<(), OspecError>,
    duration: Duration,
}

pub(crate) struct Scheduler<'c> {
    config: &'c RunConfig,
    state: RunnerState,
}

impl<'c> Scheduler<'c> {
    pub(crate) fn new(config: &'c RunConfig) -> Self {
        Self {
            config,
            state: RunnerState::new(),
        }
    }

    pub(crate) fn shared(&self) -> Rc<Shared> {
        self.state.shared().clone()
    }

    pub(crate) fn into_log(self) -> String {
        self.state.log
    }

    /// Execute the whole tree. Only malformed-suite errors are returned;
    /// every other failure ends up in the report.
    pub(crate) async fn run_root(&mut self, root: Spec) -> Result<GroupReport, OspecError> {
        let name = self.config.name.clone();
        self.run_group(name, root, None).await
    }

    fn run_group<'s>(
        &'s mut self,
        name: String,
        node: Spec,
        parent: Option<&'s Scope<'s>>,
    ) -> LocalBoxFuture<'s, Result<GroupReport, OspecError>> {
        async move {
            let started = Instant::now();
            let Spec {
                hooks,
                timeout,
                assert_factory,
                children,
            } = node;
            let scope = Scope {
                hooks: &hooks,
                timeout,
                factory: assert_factory.as_ref().or_else(|| parent.and_then(|p| p.factory)),
                parent,
            };

            let mut report = GroupReport::new(name);
            self.state.depth += 1;
            self.state.logf(&report.name);
            debug!(group = %report.name, depth = self.state.depth, "entering group");

            let entered = self
                .run_hooks(UnitKind::Before, &[scope.hooks], &scope, None, &mut report)
                .await?;
            if !entered {
                self.state.logf("[before hook failed, skipping group]");
            }

            for (index, child) in children.into_iter().enumerate() {
                if !entered || self.state.bailed() {
                    report.push(skip_child(index, child));
                    continue;
                }
                let child_name = child.display_name(index);
                match child.node {
                    Node::Test(test) => {
                        let result = self.run_test(child_name, test, &scope, &mut report).await?;
                        report.push(ReportNode::Test(result));
                    }
                    Node::Group(spec) => {
                        let result = self.run_group(child_name, spec, Some(&scope)).await?;
                        report.push(ReportNode::Group(result));
                    }
                }
            }

            // after hooks run for every entered group, bail or not
            self.run_hooks(UnitKind::After, &[scope.hooks], &scope, None, &mut report)
                .await?;

            if self.config.bail_scope == BailScope::Group && self.state.bailed() {
                self.state.logf("[bail cleared at group exit]");
                self.state.shared().clear_bail();
            }
            self.state.depth -= 1;

            report.finish(started.elapsed());
            debug!(group = %report.name, counts = ?report.counts, "leaving group");
            Ok(report)
        }
        .boxed_local()
    }

    async fn run_test(
        &mut self,
        name: String,
        test: Test,
        scope: &Scope<'_>,
        group: &mut GroupReport,
    ) -> Result<TestReport, OspecError> {
        let Test { body, location } = test;
        self.state.current_file = location.as_deref().map(|l| file_of(l).to_string());

        let mut lineage = scope.lineage();
        let ready = self
            .run_hooks(UnitKind::BeforeEach, &lineage, scope, Some(&name), group)
            .await?;

        let report = if ready {
            let outcome = self
                .run_unit(UnitKind::Test, name.clone(), scope, move |ctx| body.start(ctx))
                .await?;
            let status = match outcome.result {
                Ok(()) => Status::Pass,
                Err(ref e) if e.is_timeout() => Status::Timeout,
                Err(_) => Status::Fail,
            };
            if status != Status::Pass {
                self.note_failure();
            }
            TestReport {
                name: name.clone(),
                location,
                status,
                duration: outcome.duration,
                error: outcome.result.err(),
            }
        } else {
            TestReport::skipped(name.clone(), location)
        };

        match self.state.current_file.clone() {
            Some(file) => self.state.logf(&format!("  {} {} [{}]", report.status.tag(), name, file)),
            None => self.state.logf(&format!("  {} {}", report.status.tag(), name)),
        }

        lineage.reverse();
        self.run_hooks(UnitKind::AfterEach, &lineage, scope, Some(&name), group)
            .await?;
        self.state.current_file = None;
        Ok(report)
    }

    /// Run one hook slot across `levels` in order. Failures are attributed to
    /// `group`. `before`/`beforeEach` stop at the first failure or at bail and
    /// return `false`; `after`/`afterEach` always run every hook.
    async fn run_hooks(
        &mut self,
        kind: UnitKind,
        levels: &[&Hooks],
        scope: &Scope<'_>,
        test: Option<&str>,
        group: &mut GroupReport,
    ) -> Result<bool, OspecError> {
        let stops = matches!(kind, UnitKind::Before | UnitKind::BeforeEach);
        for hooks in levels {
            for (index, hook) in hooks.of(kind).iter().enumerate() {
                if stops && self.state.bailed() {
                    return Ok(false);
                }
                let label = match test {
                    Some(test) => format!("{}[{}] ({})", kind, index, test),
                    None => format!("{}[{}]", kind, index),
                };
                let outcome = self
                    .run_unit(kind, label, scope, |ctx| hook.start(ctx))
                    .await?;
                if let Err(error) = outcome.result {
                    self.state.logf(&format!("  HOOK {}[{}]: {}", kind, index, error));
                    self.note_failure();
                    group.hook_failures.push(HookFailure {
                        kind,
                        index,
                        test: test.map(str::to_string),
                        error,
                    });
                    if stops {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Run a single hook or test body under the timeout protocol
    async fn run_unit(
        &mut self,
        kind: UnitKind,
        label: String,
        scope: &Scope<'_>,
        start: impl FnOnce(Ctx) -> Started,
    ) -> Result<UnitOutcome, OspecError> {
        let limit = scope.resolve_timeout(self.config.default_timeout);
        let assert = match scope.factory {
            Some(factory) => (**factory)(&label),
            None => Assert::new(label.clone()),
        };
        let unit = Rc::new(UnitCell::new(kind, label));
        let ctx = Ctx::new(unit.clone(), self.state.shared().clone(), assert);

        let began = Instant::now();
        let deadline_base = tokio::time::Instant::now();
        self.state.activate(&unit);
        debug!(unit = unit.label(), %kind, "start");

        let result = match panic::catch_unwind(AssertUnwindSafe(|| start(ctx))) {
            Err(payload) => Err(panic_error(payload)),
            Ok(Started::Done(result)) => result.map_err(|e| classify(e, kind)),
            Ok(Started::Pending(body)) => {
                let guarded = AssertUnwindSafe(body).catch_unwind().boxed_local();
                self.race(&unit, guarded, deadline_base, limit).await
            }
        };

        self.state.deactivate(&unit);
        debug!(unit = unit.label(), ok = result.is_ok(), "settled");
        if let Some(err) = self.state.shared().take_misuse() {
            return Err(err);
        }
        Ok(UnitOutcome {
            result,
            duration: began.elapsed(),
        })
    }

    async fn race(
        &mut self,
        unit: &Rc<UnitCell>,
        mut body: Guarded,
        base: tokio::time::Instant,
        limit: Duration,
    ) -> Result<(), OspecError> {
        let kind = unit.kind();

        // First turn: the unit may still override its timeout here.
        if let Poll::Ready(settled) = futures::poll!(&mut body) {
            return flatten(settled, kind);
        }
        unit.suspend();

        let limit = unit.timeout_override().unwrap_or(limit);
        match tokio::time::timeout_at(base + limit, &mut body).await {
            Ok(settled) => flatten(settled, kind),
            Err(_) => {
                warn!(
                    unit = unit.label(),
                    limit_ms = limit.as_millis() as u64,
                    "timed out, still waiting for the body in the background"
                );
                self.detach(unit.label().to_string(), kind, body);
                Err(OspecError::timeout(limit))
            }
        }
    }

    /// Keep driving a timed-out body so its settlement is observed.
    fn detach(&mut self, label: String, kind: UnitKind, body: Guarded) {
        let shared = self.state.shared().clone();
        shared.timed_out_pending();
        tokio::task::spawn_local(async move {
            let settled = body.await;
            shared.settled_late();
            match flatten(settled, kind) {
                Ok(()) => warn!(unit = %label, pending = shared.pending(), "timed-out unit settled late"),
                Err(e) => warn!(unit = %label, pending = shared.pending(), error = %e, "timed-out unit failed late"),
            }
        });
    }

    fn note_failure(&mut self) {
        if self.config.bail_on_first_failure && !self.state.bailed() {
            self.state.logf("[bail on failure]");
            self.state.shared().request_bail();
        }
    }
}

/// Mark a child and everything below it as skipped
fn skip_child(index: usize, child: Child) -> ReportNode {
    let name = child.display_name(index);
    match child.node {
        Node::Test(test) => ReportNode::Test(TestReport::skipped(name, test.location)),
        Node::Group(spec) => {
            let mut group = GroupReport::new(name);
            for (i, grandchild) in spec.children.into_iter().enumerate() {
                group.push(skip_child(i, grandchild));
            }
            group.finish(Duration::ZERO);
            ReportNode::Group(group)
        }
    }
}

/// Keep an `OspecError` raised by the body; classify anything else by unit kind.
fn classify(err: anyhow::Error, kind: UnitKind) -> OspecError {
    match err.downcast::<OspecError>() {
        Ok(err) => err,
        Err(other) => OspecError::new(kind.failure_kind(), format!("{:#}", other)),
    }
}

fn flatten(settled: std::thread::Result<BodyResult>, kind: UnitKind) -> Result<(), OspecError> {
    match settled {
        Ok(result) => result.map_err(|e| classify(e, kind)),
        Err(payload) => Err(panic_error(payload)),
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> OspecError {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    OspecError::panic(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_scope_resolution_walks_parents() {
        let outer_hooks = Hooks::default();
        let inner_hooks = Hooks::default();
        let outer = Scope {
            hooks: &outer_hooks,
            timeout: Some(Duration::from_millis(40)),
            factory: None,
            parent: None,
        };
        let inner = Scope {
            hooks: &inner_hooks,
            timeout: None,
            factory: None,
            parent: Some(&outer),
        };
        assert_eq!(inner.resolve_timeout(Duration::from_millis(200)), Duration::from_millis(40));
        let lineage = inner.lineage();
        assert_eq!(lineage.len(), 2);
        assert!(std::ptr::eq(lineage[0], &outer_hooks));
        assert!(std::ptr::eq(lineage[1], &inner_hooks));
    }

    #[test]
    fn test_scope_without_timeouts_uses_fallback() {
        let hooks = Hooks::default();
        let scope = Scope {
            hooks: &hooks,
            timeout: None,
            factory: None,
            parent: None,
        };
        assert_eq!(scope.resolve_timeout(Duration::from_millis(7)), Duration::from_millis(7));
    }

    #[test]
    fn test_classify_keeps_assertion_kind() {
        let err = classify(OspecError::assertion("x").into(), UnitKind::BeforeEach);
        assert_eq!(err.kind, ErrorKind::AssertionFailure);
        let err = classify(anyhow::anyhow!("db down"), UnitKind::BeforeEach);
        assert_eq!(err.kind, ErrorKind::HookFailure);
        let err = classify(anyhow::anyhow!("db down"), UnitKind::Test);
        assert_eq!(err.kind, ErrorKind::TestFailure);
        assert_eq!(err.message, "db down");
    }

    #[test]
    fn test_panic_payloads() {
        assert_eq!(panic_error(Box::new("boom")).message, "boom");
        assert_eq!(panic_error(Box::new(String::from("bang"))).message, "bang");
        assert_eq!(panic_error(Box::new(3u8)).message, "non-string panic payload");
    }

    #[test]
    fn test_skip_child_marks_whole_subtree() {
        let mut spec = Spec::new();
        spec.test("a", |_| Ok(())).unwrap();
        spec.group("g", |g| {
            g.test("b", |_| Ok(()))?;
            g.test("c", |_| Ok(()))
        })
        .unwrap();
        let child = Child {
            name: Some("root".into()),
            node: Node::Group(spec),
        };
        match skip_child(0, child) {
            ReportNode::Group(g) => {
                assert_eq!(g.counts.skipped, 3);
                assert_eq!(g.counts.total(), 3);
            }
            ReportNode::Test(_) => panic!("expected a group"),
        }
    }
}
