//! Run entry point
//!
//! Takes ownership of a root [`Spec`], drives it to completion on a local
//! task set, waits a bounded time for timed-out bodies to drain, and returns
//! the [`Report`].

use std::cell::Cell;
use std::time::{Duration, Instant};
use tokio::task::LocalSet;
use crate::engine::Scheduler;
use crate::error::{ErrorKind, OspecError};
use crate::report::Report;
use crate::spec::Spec;

/// Timeout applied when no group in a unit's ancestry sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// How long a finished run waits for timed-out bodies to settle
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How far a bail reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BailScope {
    /// Stop everything not yet started, at every level
    #[default]
    Run,
    /// Stop the remaining children of the group where bail was raised;
    /// the enclosing groups carry on
    Group,
}

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name reported for the root group
    pub name: String,
    /// Raise bail on the first failed test or hook
    pub bail_on_first_failure: bool,
    pub bail_scope: BailScope,
    /// Timeout for units with no timeout in their ancestry
    pub default_timeout: Duration,
    /// Drain window after the tree completes; `None` waits indefinitely
    pub drain_timeout: Option<Duration>,
    /// Print the execution log from `run_and_assert`
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "ospec".into(),
            bail_on_first_failure: false,
            bail_scope: BailScope::Run,
            default_timeout: DEFAULT_TIMEOUT,
            drain_timeout: Some(DEFAULT_DRAIN_TIMEOUT),
            verbose: false,
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `OSPEC_BAIL`, `OSPEC_BAIL_SCOPE`,
    /// `OSPEC_TIMEOUT_MS`, `OSPEC_DRAIN_MS` and `OSPEC_VERBOSE`
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = get("OSPEC_BAIL") {
            config.bail_on_first_failure = is_truthy(&v);
        }
        if let Some(v) = get("OSPEC_BAIL_SCOPE") {
            match v.to_lowercase().as_str() {
                "group" => config.bail_scope = BailScope::Group,
                "run" => config.bail_scope = BailScope::Run,
                other => tracing::warn!("ignoring OSPEC_BAIL_SCOPE={:?}", other),
            }
        }
        if let Some(ms) = get("OSPEC_TIMEOUT_MS").and_then(|v| parse_ms("OSPEC_TIMEOUT_MS", &v)) {
            config.default_timeout = ms;
        }
        if let Some(ms) = get("OSPEC_DRAIN_MS").and_then(|v| parse_ms("OSPEC_DRAIN_MS", &v)) {
            config.drain_timeout = Some(ms);
        }
        config.verbose = get("OSPEC_VERBOSE").is_some();
        config
    }
}

fn is_truthy(v: &str) -> bool {
    !matches!(v.to_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

fn parse_ms(key: &str, v: &str) -> Option<Duration> {
    match v.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not a number of milliseconds", key, v);
            None
        }
    }
}

thread_local! {
    static RUN_ACTIVE: Cell<bool> = Cell::new(false);
}

/// Holds the single-active-run slot of the current thread
struct ActiveRun;

impl ActiveRun {
    fn enter() -> Result<Self, OspecError> {
        Self::ensure_idle()?;
        RUN_ACTIVE.with(|active| active.set(true));
        Ok(ActiveRun)
    }

    /// Fail if a run is already active on this thread
    fn ensure_idle() -> Result<(), OspecError> {
        if RUN_ACTIVE.with(|active| active.get()) {
            Err(OspecError::misuse("a run is already active on this thread"))
        } else {
            Ok(())
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        RUN_ACTIVE.with(|active| active.set(false));
    }
}

/// Executes spec trees
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunConfig,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run `root` to completion.
    ///
    /// Returns `Err` only for a malformed suite (`Misuse`) or a second run
    /// started while one is active on this thread. Test and hook failures
    /// are in the report.
    pub async fn run(&self, root: Spec) -> Result<Report, OspecError> {
        let _active = ActiveRun::enter()?;
        let started = Instant::now();
        let local = LocalSet::new();
        let mut scheduler = Scheduler::new(&self.config);
        let shared = scheduler.shared();

        let root = local.run_until(scheduler.run_root(root)).await?;
        let pending_at_finish = shared.pending();

        if pending_at_finish > 0 {
            tracing::info!(pending = pending_at_finish, "waiting for timed-out units to settle");
            match self.config.drain_timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, local).await.is_err() {
                        tracing::warn!(
                            pending = shared.pending(),
                            "drain window of {}ms elapsed",
                            limit.as_millis()
                        );
                    }
                }
                None => local.await,
            }
        }

        if let Some(err) = shared.take_misuse() {
            return Err(err);
        }

        Ok(Report {
            root,
            bailed: shared.bail_raised(),
            pending_at_finish,
            pending_after_drain: shared.pending(),
            duration: started.elapsed(),
            log: scheduler.into_log(),
        })
    }

    /// Run on a fresh current-thread runtime
    pub fn run_blocking(&self, root: Spec) -> Result<Report, OspecError> {
        // A nested runtime would panic in `block_on`; report misuse instead.
        ActiveRun::ensure_idle()?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| OspecError::new(ErrorKind::Runtime, e.to_string()))?;
        rt.block_on(self.run(root))
    }
}

/// Builder API for convenient runner construction
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    config: RunConfig,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. `RunConfig::from_env()`
    pub fn with_config(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Stop at the first failed test or hook
    pub fn bail(mut self, bail: bool) -> Self {
        self.config.bail_on_first_failure = bail;
        self
    }

    pub fn bail_scope(mut self, scope: BailScope) -> Self {
        self.config.bail_scope = scope;
        self
    }

    pub fn default_timeout(mut self, limit: Duration) -> Self {
        self.config.default_timeout = limit;
        self
    }

    pub fn drain_timeout(mut self, limit: Option<Duration>) -> Self {
        self.config.drain_timeout = limit;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> Runner {
        Runner::new(self.config)
    }

    /// Build and run on a fresh runtime
    pub fn run_blocking(self, root: Spec) -> Result<Report, OspecError> {
        self.build().run_blocking(root)
    }
}

/// Convenience function: start building a runner
pub fn runner() -> RunnerBuilder {
    RunnerBuilder::new()
}

/// Run a suite from a `#[test]` and panic if anything failed.
///
/// ```rust,ignore
/// #[test]
/// fn suite() {
///     let mut root = ospec::Spec::new();
///     root.test("adds", |o| Ok(o.assert().eq(&(1 + 1), &2)?)).unwrap();
///     ospec::run_and_assert(root);
/// }
/// ```
pub fn run_and_assert(root: Spec) {
    run_and_assert_with(root, RunConfig::from_env());
}

/// Like `run_and_assert` with an explicit config.
pub fn run_and_assert_with(root: Spec, config: RunConfig) {
    let verbose = config.verbose;
    let report = Runner::new(config)
        .run_blocking(root)
        .unwrap_or_else(|e| panic!("malformed suite: {}", e));

    if verbose && !report.log.is_empty() {
        eprintln!("--- log ---");
        eprint!("{}", report.log);
    }
    eprintln!("{}", report);

    if !report.exit_ok() {
        let c = report.counts();
        panic!(
            "{} test(s) failed, {} timed out, {} hook failure(s), {} still pending",
            c.failed,
            c.timed_out,
            report.root.hook_failure_count(),
            report.pending_after_drain,
        );
    }
}
