//! Engine errors

use std::fmt;
use std::time::Duration;

/// The kind of engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised through the assertion object
    AssertionFailure,
    /// Any other error returned by a test body
    TestFailure,
    /// Any other error returned by a hook
    HookFailure,
    /// Body did not settle within its resolved timeout
    Timeout,
    /// Body panicked
    Panic,
    /// Timeout setter used outside the active unit, or after it suspended
    Misuse,
    /// Two direct children declared with the same name
    DuplicateName,
    /// The async runtime for a blocking run could not be started
    Runtime,
}

impl ErrorKind {
    /// Short label used in reports
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::AssertionFailure => "assertion failed",
            ErrorKind::TestFailure => "test failed",
            ErrorKind::HookFailure => "hook failed",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Panic => "panicked",
            ErrorKind::Misuse => "misuse",
            ErrorKind::DuplicateName => "duplicate name",
            ErrorKind::Runtime => "runtime error",
        }
    }
}

/// An engine error with the group path it was raised under
#[derive(Debug, Clone)]
pub struct OspecError {
    pub kind: ErrorKind,
    pub message: String,
    /// Enclosing group names, outermost first
    pub path: Vec<String>,
}

impl OspecError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Prepend an enclosing group name
    pub fn with_path(mut self, group: impl Into<String>) -> Self {
        self.path.insert(0, group.into());
        self
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionFailure, msg)
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::HookFailure, msg)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("did not settle within {}ms", limit.as_millis()),
        )
    }

    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse, msg)
    }

    pub fn duplicate(name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateName,
            format!("a child named {:?} is already declared here", name),
        )
    }

    pub fn panic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panic, msg)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Programmer errors in the suite itself; surfaced instead of recorded
    pub fn is_malformed_suite(&self) -> bool {
        matches!(self.kind, ErrorKind::Misuse | ErrorKind::DuplicateName)
    }
}

impl fmt::Display for OspecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_empty() {
            write!(f, "{}: ", self.path.join(" > "))?;
        }
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for OspecError {}
