//! Default assertion object
//!
//! Every hook and test body receives an `Assert` through its context. The
//! engine never looks inside; it only sees whether the body returned an error.
//! Groups can swap in their own factory with `Spec::assert_with`.

use std::fmt::Debug;
use std::rc::Rc;
use similar::TextDiff;
use crate::error::OspecError;

/// Produces the assertion object for a unit, given the unit's name
pub type AssertFactory = Rc<dyn Fn(&str) -> Assert>;

/// Assertion helpers that fail with `ErrorKind::AssertionFailure`
#[derive(Debug, Clone)]
pub struct Assert {
    subject: String,
    context: Option<String>,
    diff: bool,
}

impl Assert {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            context: None,
            diff: true,
        }
    }

    /// Extra text prefixed to every failure message
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Disable unified diffs on multi-line mismatches
    pub fn without_diff(mut self) -> Self {
        self.diff = false;
        self
    }

    /// Name of the unit this object was made for
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Build a failure carrying this object's context
    pub fn fail(&self, msg: impl Into<String>) -> OspecError {
        let msg = msg.into();
        match self.context {
            Some(ref ctx) => OspecError::assertion(format!("{}: {}", ctx, msg)),
            None => OspecError::assertion(msg),
        }
    }

    pub fn ok(&self, cond: bool, what: &str) -> Result<(), OspecError> {
        if cond {
            Ok(())
        } else {
            Err(self.fail(format!("expected {} to hold", what)))
        }
    }

    pub fn eq<T: PartialEq + Debug + ?Sized>(&self, actual: &T, expected: &T) -> Result<(), OspecError> {
        if actual == expected {
            return Ok(());
        }
        let left = format!("{:#?}", actual);
        let right = format!("{:#?}", expected);
        Err(self.mismatch(&left, &right))
    }

    pub fn ne<T: PartialEq + Debug + ?Sized>(&self, actual: &T, unexpected: &T) -> Result<(), OspecError> {
        if actual != unexpected {
            Ok(())
        } else {
            Err(self.fail(format!("expected a value other than {:?}", unexpected)))
        }
    }

    /// Compare text, reporting a unified diff when either side spans lines
    pub fn text_eq(&self, actual: &str, expected: &str) -> Result<(), OspecError> {
        if actual == expected {
            Ok(())
        } else {
            Err(self.mismatch(actual, expected))
        }
    }

    /// Expect `result` to be an error whose message contains `needle`
    pub fn err_contains<T: Debug, E: std::fmt::Display>(
        &self,
        result: &Result<T, E>,
        needle: &str,
    ) -> Result<(), OspecError> {
        match result {
            Ok(v) => Err(self.fail(format!("expected an error, got Ok({:?})", v))),
            Err(e) if e.to_string().contains(needle) => Ok(()),
            Err(e) => Err(self.fail(format!("error {:?} does not contain {:?}", e.to_string(), needle))),
        }
    }

    fn mismatch(&self, actual: &str, expected: &str) -> OspecError {
        if self.diff && (actual.contains('\n') || expected.contains('\n')) {
            let udiff = TextDiff::from_lines(expected, actual)
                .unified_diff()
                .header("expected", "actual")
                .to_string();
            self.fail(format!("values differ\n{}", udiff))
        } else {
            self.fail(format!("expected {}, got {}", expected, actual))
        }
    }
}
