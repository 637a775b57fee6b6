//! Spec tree declaration
//!
//! A [`Spec`] is a group: ordered hook lists, an optional default timeout and
//! assertion factory, and ordered, uniquely named children. Nested groups are
//! declared inside a closure that receives the child as the active target.
//!
//! ```rust,ignore
//! let mut root = Spec::new();
//! root.before(|_| Ok(()));
//! root.group("math", |g| {
//!     g.test("adds", |o| Ok(o.assert().eq(&(1 + 1), &2)?))?;
//!     g.it(|o| Ok(o.assert().ok(true, "anything")?))
//! })?;
//! ```

use std::future::Future;
use std::panic::Location;
use std::rc::Rc;
use std::time::Duration;
use futures::future::{FutureExt, LocalBoxFuture};
use crate::assert::{Assert, AssertFactory};
use crate::context::{Ctx, UnitKind};
use crate::error::OspecError;
use crate::stack::{caller_frame, StackLabeler};

/// Result of a hook or test body
pub type BodyResult = anyhow::Result<()>;

type SyncHookFn = dyn Fn(&Ctx) -> BodyResult;
type AsyncHookFn = dyn Fn(Ctx) -> LocalBoxFuture<'static, BodyResult>;
type SyncTestFn = dyn FnOnce(&Ctx) -> BodyResult;
type AsyncTestFn = dyn FnOnce(Ctx) -> LocalBoxFuture<'static, BodyResult>;

/// What a body produced on its first turn
pub(crate) enum Started {
    /// Synchronous body, already finished
    Done(BodyResult),
    /// Asynchronous body, not yet polled
    Pending(LocalBoxFuture<'static, BodyResult>),
}

pub(crate) enum Hook {
    Sync(Box<SyncHookFn>),
    Async(Box<AsyncHookFn>),
}

impl Hook {
    pub(crate) fn start(&self, ctx: Ctx) -> Started {
        match self {
            Hook::Sync(f) => Started::Done(f(&ctx)),
            Hook::Async(f) => Started::Pending(f(ctx)),
        }
    }
}

pub(crate) enum TestBody {
    Sync(Box<SyncTestFn>),
    Async(Box<AsyncTestFn>),
}

impl TestBody {
    pub(crate) fn start(self, ctx: Ctx) -> Started {
        match self {
            TestBody::Sync(f) => Started::Done(f(&ctx)),
            TestBody::Async(f) => Started::Pending(f(ctx)),
        }
    }
}

/// A test leaf
pub(crate) struct Test {
    pub(crate) body: TestBody,
    /// `file:line` of the declaration, when it could be derived
    pub(crate) location: Option<String>,
}

/// Ordered hook lists of one group
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) before: Vec<Hook>,
    pub(crate) before_each: Vec<Hook>,
    pub(crate) after: Vec<Hook>,
    pub(crate) after_each: Vec<Hook>,
}

impl Hooks {
    pub(crate) fn of(&self, kind: UnitKind) -> &[Hook] {
        match kind {
            UnitKind::Before => &self.before,
            UnitKind::BeforeEach => &self.before_each,
            UnitKind::After => &self.after,
            UnitKind::AfterEach => &self.after_each,
            UnitKind::Test => &[],
        }
    }

    fn push(&mut self, kind: UnitKind, hook: Hook) {
        match kind {
            UnitKind::Before => self.before.push(hook),
            UnitKind::BeforeEach => self.before_each.push(hook),
            UnitKind::After => self.after.push(hook),
            UnitKind::AfterEach => self.after_each.push(hook),
            UnitKind::Test => unreachable!("tests are children, not hooks"),
        }
    }
}

pub(crate) enum Node {
    Group(Spec),
    Test(Test),
}

pub(crate) struct Child {
    /// `None` for an anonymous test whose location could not be labeled
    pub(crate) name: Option<String>,
    pub(crate) node: Node,
}

impl Child {
    /// Reported name; anonymous children get a positional placeholder
    pub(crate) fn display_name(&self, index: usize) -> String {
        match self.name {
            Some(ref name) => name.clone(),
            None => format!("(anonymous #{})", index + 1),
        }
    }
}

/// A group of hooks, tests and nested groups
#[derive(Default)]
pub struct Spec {
    pub(crate) hooks: Hooks,
    pub(crate) timeout: Option<Duration>,
    pub(crate) assert_factory: Option<AssertFactory>,
    pub(crate) children: Vec<Child>,
}

impl Spec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default timeout for every unit in this subtree, unless overridden below
    pub fn timeout(&mut self, limit: Duration) -> &mut Self {
        self.timeout = Some(limit);
        self
    }

    /// Assertion factory for every unit in this subtree, unless overridden below
    pub fn assert_with(&mut self, factory: impl Fn(&str) -> Assert + 'static) -> &mut Self {
        self.assert_factory = Some(Rc::new(factory));
        self
    }

    pub fn before(&mut self, hook: impl Fn(&Ctx) -> BodyResult + 'static) -> &mut Self {
        self.add_sync_hook(UnitKind::Before, hook)
    }

    pub fn after(&mut self, hook: impl Fn(&Ctx) -> BodyResult + 'static) -> &mut Self {
        self.add_sync_hook(UnitKind::After, hook)
    }

    pub fn before_each(&mut self, hook: impl Fn(&Ctx) -> BodyResult + 'static) -> &mut Self {
        self.add_sync_hook(UnitKind::BeforeEach, hook)
    }

    pub fn after_each(&mut self, hook: impl Fn(&Ctx) -> BodyResult + 'static) -> &mut Self {
        self.add_sync_hook(UnitKind::AfterEach, hook)
    }

    pub fn before_async<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        self.add_async_hook(UnitKind::Before, hook)
    }

    pub fn after_async<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        self.add_async_hook(UnitKind::After, hook)
    }

    pub fn before_each_async<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        self.add_async_hook(UnitKind::BeforeEach, hook)
    }

    pub fn after_each_async<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        self.add_async_hook(UnitKind::AfterEach, hook)
    }

    /// Declare a nested group. `block` declares its contents; errors raised
    /// inside are returned with this group's name on their path.
    pub fn group(
        &mut self,
        name: impl Into<String>,
        block: impl FnOnce(&mut Spec) -> Result<(), OspecError>,
    ) -> Result<(), OspecError> {
        let name = name.into();
        self.ensure_unique(&name)?;
        let mut child = Spec::new();
        block(&mut child).map_err(|e| e.with_path(name.clone()))?;
        self.children.push(Child {
            name: Some(name),
            node: Node::Group(child),
        });
        Ok(())
    }

    /// Declare a synchronous test
    pub fn test(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&Ctx) -> BodyResult + 'static,
    ) -> Result<(), OspecError> {
        self.add_test(Some(name.into()), None, TestBody::Sync(Box::new(body)))
    }

    /// Declare an asynchronous test, raced against its resolved timeout
    pub fn test_async<F, Fut>(&mut self, name: impl Into<String>, body: F) -> Result<(), OspecError>
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        let body = TestBody::Async(Box::new(move |ctx| body(ctx).boxed_local()));
        self.add_test(Some(name.into()), None, body)
    }

    /// Declare an anonymous synchronous test named after its call site.
    /// Repeated declarations from one call site, e.g. in a loop, are
    /// numbered `file:line #2`, `file:line #3` and so on.
    #[track_caller]
    pub fn it(&mut self, body: impl FnOnce(&Ctx) -> BodyResult + 'static) -> Result<(), OspecError> {
        let label = label_caller(Location::caller());
        let name = label.as_deref().map(|l| self.anonymous_name(l));
        self.add_test(name, label, TestBody::Sync(Box::new(body)))
    }

    /// Declare an anonymous asynchronous test named after its call site
    #[track_caller]
    pub fn it_async<F, Fut>(&mut self, body: F) -> Result<(), OspecError>
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        let label = label_caller(Location::caller());
        let name = label.as_deref().map(|l| self.anonymous_name(l));
        let body = TestBody::Async(Box::new(move |ctx| body(ctx).boxed_local()));
        self.add_test(name, label, body)
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Names of direct children in declaration order
    pub fn child_names(&self) -> Vec<String> {
        self.children
            .iter()
            .enumerate()
            .map(|(i, c)| c.display_name(i))
            .collect()
    }

    fn add_sync_hook(&mut self, kind: UnitKind, hook: impl Fn(&Ctx) -> BodyResult + 'static) -> &mut Self {
        self.hooks.push(kind, Hook::Sync(Box::new(hook)));
        self
    }

    fn add_async_hook<F, Fut>(&mut self, kind: UnitKind, hook: F) -> &mut Self
    where
        F: Fn(Ctx) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        self.hooks.push(kind, Hook::Async(Box::new(move |ctx| hook(ctx).boxed_local())));
        self
    }

    fn add_test(&mut self, name: Option<String>, location: Option<String>, body: TestBody) -> Result<(), OspecError> {
        if let Some(ref name) = name {
            self.ensure_unique(name)?;
        }
        self.children.push(Child {
            name,
            node: Node::Test(Test { body, location }),
        });
        Ok(())
    }

    /// First free name for a call-site label among the direct children
    fn anonymous_name(&self, label: &str) -> String {
        let taken = |name: &str| self.children.iter().any(|c| c.name.as_deref() == Some(name));
        if !taken(label) {
            return label.to_string();
        }
        (2..)
            .map(|n| format!("{} #{}", label, n))
            .find(|name| !taken(name))
            .unwrap_or_else(|| label.to_string())
    }

    fn ensure_unique(&self, name: &str) -> Result<(), OspecError> {
        if self.children.iter().any(|c| c.name.as_deref() == Some(name)) {
            return Err(OspecError::duplicate(name));
        }
        Ok(())
    }
}

fn label_caller(location: &Location<'_>) -> Option<String> {
    StackLabeler::standard().label(&caller_frame(location))
}
