//! Result tree
//!
//! Mirrors the spec tree. Leaves carry an outcome and timing, groups carry
//! aggregate counts and the hook failures attributed to them.

use std::fmt;
use std::time::Duration;
use crate::context::UnitKind;
use crate::error::OspecError;

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Fail,
    Timeout,
    /// Not executed: bail, a failed `before`, or a failed `beforeEach`
    Skipped,
}

impl Status {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Timeout => "TIME",
            Status::Skipped => "SKIP",
        }
    }
}

#[derive(Debug)]
pub struct TestReport {
    pub name: String,
    /// `file:line` of an anonymous declaration
    pub location: Option<String>,
    pub status: Status,
    pub duration: Duration,
    pub error: Option<OspecError>,
}

impl TestReport {
    pub(crate) fn skipped(name: String, location: Option<String>) -> Self {
        Self {
            name,
            location,
            status: Status::Skipped,
            duration: Duration::ZERO,
            error: None,
        }
    }
}

/// A hook failure, attributed to the group that declared or enclosed it
#[derive(Debug)]
pub struct HookFailure {
    pub kind: UnitKind,
    /// Position of the hook within its list
    pub index: usize,
    /// Test the `beforeEach`/`afterEach` ran around
    pub test: Option<String>,
    pub error: OspecError,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.timed_out + self.skipped
    }

    fn add(&mut self, other: Counts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.skipped += other.skipped;
    }

    fn count(&mut self, status: Status) {
        match status {
            Status::Pass => self.passed += 1,
            Status::Fail => self.failed += 1,
            Status::Timeout => self.timed_out += 1,
            Status::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug)]
pub enum ReportNode {
    Test(TestReport),
    Group(GroupReport),
}

impl ReportNode {
    pub fn name(&self) -> &str {
        match self {
            ReportNode::Test(t) => &t.name,
            ReportNode::Group(g) => &g.name,
        }
    }
}

#[derive(Debug)]
pub struct GroupReport {
    pub name: String,
    pub children: Vec<ReportNode>,
    pub hook_failures: Vec<HookFailure>,
    pub counts: Counts,
    pub duration: Duration,
}

impl GroupReport {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
            hook_failures: Vec::new(),
            counts: Counts::default(),
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn push(&mut self, node: ReportNode) {
        self.children.push(node);
    }

    /// Compute aggregate counts once every child is accounted for
    pub(crate) fn finish(&mut self, duration: Duration) {
        let mut counts = Counts::default();
        for child in &self.children {
            match child {
                ReportNode::Test(t) => counts.count(t.status),
                ReportNode::Group(g) => counts.add(g.counts),
            }
        }
        self.counts = counts;
        self.duration = duration;
    }

    /// Hook failures in this group and every group below it
    pub fn hook_failure_count(&self) -> usize {
        self.hook_failures.len()
            + self
                .children
                .iter()
                .map(|c| match c {
                    ReportNode::Group(g) => g.hook_failure_count(),
                    ReportNode::Test(_) => 0,
                })
                .sum::<usize>()
    }

    /// Direct child by name
    pub fn child(&self, name: &str) -> Option<&ReportNode> {
        self.children.iter().find(|c| c.name() == name)
    }

    /// Test by path of names below this group, e.g. `["math", "adds"]`
    pub fn test(&self, path: &[&str]) -> Option<&TestReport> {
        let (last, groups) = path.split_last()?;
        let mut group = self;
        for name in groups {
            match group.child(name)? {
                ReportNode::Group(g) => group = g,
                ReportNode::Test(_) => return None,
            }
        }
        match group.child(last)? {
            ReportNode::Test(t) => Some(t),
            ReportNode::Group(_) => None,
        }
    }

    /// Nested group by path of names below this group
    pub fn group(&self, path: &[&str]) -> Option<&GroupReport> {
        let mut group = self;
        for name in path {
            match group.child(name)? {
                ReportNode::Group(g) => group = g,
                ReportNode::Test(_) => return None,
            }
        }
        Some(group)
    }

    /// Every test in declaration order, with its group path
    pub fn tests(&self) -> Vec<(Vec<&str>, &TestReport)> {
        let mut out = Vec::new();
        self.collect_tests(&mut Vec::new(), &mut out);
        out
    }

    fn collect_tests<'a>(&'a self, path: &mut Vec<&'a str>, out: &mut Vec<(Vec<&'a str>, &'a TestReport)>) {
        for child in &self.children {
            match child {
                ReportNode::Test(t) => out.push((path.clone(), t)),
                ReportNode::Group(g) => {
                    path.push(&g.name);
                    g.collect_tests(path, out);
                    path.pop();
                }
            }
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for failure in &self.hook_failures {
            match failure.test {
                Some(ref test) => writeln!(f, "{}HOOK  {}[{}] around {}", pad, failure.kind, failure.index, test)?,
                None => writeln!(f, "{}HOOK  {}[{}]", pad, failure.kind, failure.index)?,
            }
            for line in failure.error.to_string().lines() {
                writeln!(f, "{}      {}", pad, line)?;
            }
        }
        for child in &self.children {
            match child {
                ReportNode::Group(g) => {
                    writeln!(f, "{}{}", pad, g.name)?;
                    g.render(f, depth + 1)?;
                }
                ReportNode::Test(t) => {
                    writeln!(f, "{}{}  {} ({}ms)", pad, t.status.tag(), t.name, t.duration.as_millis())?;
                    if let Some(ref err) = t.error {
                        for line in err.to_string().lines() {
                            writeln!(f, "{}      {}", pad, line)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Result of a whole run
#[derive(Debug)]
pub struct Report {
    pub root: GroupReport,
    /// Whether bail was raised at any point
    pub bailed: bool,
    /// Timed-out bodies still pending when the tree finished
    pub pending_at_finish: usize,
    /// Timed-out bodies still pending after the drain window
    pub pending_after_drain: usize,
    pub duration: Duration,
    /// Execution log
    pub log: String,
}

impl Report {
    pub fn counts(&self) -> Counts {
        self.root.counts
    }

    /// No test failed or timed out, and no hook failed
    pub fn all_passed(&self) -> bool {
        let c = self.root.counts;
        c.failed == 0 && c.timed_out == 0 && self.root.hook_failure_count() == 0
    }

    /// No timed-out body is still running
    pub fn drained(&self) -> bool {
        self.pending_after_drain == 0
    }

    /// The value a process exit code should be derived from
    pub fn exit_ok(&self) -> bool {
        self.all_passed() && self.drained()
    }

    /// Shorthand for `root.test(path)`
    pub fn test(&self, path: &[&str]) -> Option<&TestReport> {
        self.root.test(path)
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        let c = self.root.counts;
        let mut line = format!(
            "{} passed, {} failed, {} timed out, {} skipped ({}ms)",
            c.passed,
            c.failed,
            c.timed_out,
            c.skipped,
            self.duration.as_millis(),
        );
        let hooks = self.root.hook_failure_count();
        if hooks > 0 {
            line.push_str(&format!(", {} hook failure(s)", hooks));
        }
        if self.bailed {
            line.push_str(", bailed");
        }
        if self.pending_after_drain > 0 {
            line.push_str(&format!(", {} timed-out test(s) never settled", self.pending_after_drain));
        }
        line
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.render(f, 0)?;
        writeln!(f)?;
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, status: Status) -> ReportNode {
        ReportNode::Test(TestReport {
            name: name.into(),
            location: None,
            status,
            duration: Duration::from_millis(1),
            error: None,
        })
    }

    fn sample() -> GroupReport {
        let mut inner = GroupReport::new("inner".into());
        inner.push(leaf("t2", Status::Fail));
        inner.push(leaf("t3", Status::Timeout));
        inner.finish(Duration::ZERO);

        let mut root = GroupReport::new("root".into());
        root.push(leaf("t1", Status::Pass));
        root.push(ReportNode::Group(inner));
        root.push(leaf("t4", Status::Skipped));
        root.finish(Duration::ZERO);
        root
    }

    #[test]
    fn test_counts_aggregate_nested_groups() {
        let root = sample();
        assert_eq!(
            root.counts,
            Counts { passed: 1, failed: 1, timed_out: 1, skipped: 1 }
        );
        assert_eq!(root.counts.total(), 4);
        assert_eq!(root.group(&["inner"]).unwrap().counts.failed, 1);
    }

    #[test]
    fn test_lookup_by_path() {
        let root = sample();
        assert_eq!(root.test(&["inner", "t3"]).unwrap().status, Status::Timeout);
        assert!(root.test(&["inner"]).is_none());
        assert!(root.test(&["t1", "x"]).is_none());
        assert!(root.test(&[]).is_none());
    }

    #[test]
    fn test_tests_in_declaration_order() {
        let root = sample();
        let names: Vec<String> = root
            .tests()
            .into_iter()
            .map(|(path, t)| {
                let mut full = path.join("/");
                if !full.is_empty() {
                    full.push('/');
                }
                full + &t.name
            })
            .collect();
        assert_eq!(names, vec!["t1", "inner/t2", "inner/t3", "t4"]);
    }

    #[test]
    fn test_exit_ok_requires_drain() {
        let mut root = GroupReport::new("root".into());
        root.push(leaf("t1", Status::Pass));
        root.finish(Duration::ZERO);
        let mut report = Report {
            root,
            bailed: false,
            pending_at_finish: 1,
            pending_after_drain: 1,
            duration: Duration::ZERO,
            log: String::new(),
        };
        assert!(report.all_passed());
        assert!(!report.exit_ok());
        report.pending_after_drain = 0;
        assert!(report.exit_ok());
    }

    #[test]
    fn test_hook_failures_fail_the_run() {
        let mut root = GroupReport::new("root".into());
        root.hook_failures.push(HookFailure {
            kind: UnitKind::After,
            index: 0,
            test: None,
            error: OspecError::hook("cleanup failed"),
        });
        root.finish(Duration::ZERO);
        let report = Report {
            root,
            bailed: false,
            pending_at_finish: 0,
            pending_after_drain: 0,
            duration: Duration::ZERO,
            log: String::new(),
        };
        assert!(!report.all_passed());
        assert!(report.summary().contains("1 hook failure(s)"));
        assert!(report.to_string().contains("HOOK  after[0]"));
    }

    #[test]
    fn test_render_tree() {
        let report = Report {
            root: sample(),
            bailed: true,
            pending_at_finish: 0,
            pending_after_drain: 0,
            duration: Duration::ZERO,
            log: String::new(),
        };
        let text = report.to_string();
        assert!(text.contains("PASS  t1 (1ms)"));
        assert!(text.contains("inner\n  FAIL  t2"));
        assert!(text.contains("  TIME  t3"));
        assert!(text.ends_with("1 passed, 1 failed, 1 timed out, 1 skipped (0ms), bailed"));
    }
}
