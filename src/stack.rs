//! Declaration-site labels
//!
//! Extracts a `file:line` token from a captured call stack so anonymous
//! tests get a readable name. A stack is plain text, one frame per line.

use std::panic::Location;
use std::sync::OnceLock;
use regex::Regex;

/// Default frame pattern: the last path component plus line, dropping the column.
const DEFAULT_PATTERN: &str = r"([^/\\\s:]+:\d+):\d+";

/// Matches frames against a pattern and returns the first extracted token
#[derive(Debug, Clone)]
pub struct StackLabeler {
    pattern: Regex,
}

impl StackLabeler {
    /// Build a labeler. If the pattern has a capture group, group 1 is the
    /// token; otherwise the whole match is.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// The shared labeler using the default `file:line` pattern
    pub fn standard() -> &'static StackLabeler {
        static STANDARD: OnceLock<StackLabeler> = OnceLock::new();
        STANDARD.get_or_init(|| StackLabeler {
            pattern: Regex::new(DEFAULT_PATTERN).expect("default frame pattern is valid"),
        })
    }

    /// Label from a multi-line stack
    pub fn label(&self, stack: &str) -> Option<String> {
        self.label_frames(stack.lines())
    }

    /// Label from an ordered sequence of frame descriptors
    pub fn label_frames<'a>(&self, frames: impl IntoIterator<Item = &'a str>) -> Option<String> {
        frames.into_iter().find_map(|frame| {
            let caps = self.pattern.captures(frame)?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        })
    }
}

impl Default for StackLabeler {
    fn default() -> Self {
        Self::standard().clone()
    }
}

/// Render a caller location as a single stack frame.
pub fn caller_frame(location: &Location<'_>) -> String {
    format!("at {}:{}:{}", location.file(), location.line(), location.column())
}

/// The file part of a `file:line` label
pub fn file_of(label: &str) -> &str {
    match label.rfind(':') {
        Some(idx) => &label[..idx],
        None => label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_unix_frame() {
        let stack = "   3: my_crate::suite\n             at ./tests/suite.rs:42:9";
        assert_eq!(StackLabeler::standard().label(stack).as_deref(), Some("suite.rs:42"));
    }

    #[test]
    fn test_label_windows_frame() {
        let frame = r"at C:\work\proj\tests\suite.rs:7:1";
        assert_eq!(
            StackLabeler::standard().label(frame).as_deref(),
            Some("suite.rs:7")
        );
    }

    #[test]
    fn test_first_matching_frame_wins() {
        let frames = ["no location here", "at a/first.rs:1:1", "at b/second.rs:2:2"];
        assert_eq!(
            StackLabeler::standard().label_frames(frames).as_deref(),
            Some("first.rs:1")
        );
    }

    #[test]
    fn test_no_match_is_none() {
        assert_eq!(StackLabeler::standard().label("<unknown>\n  in main"), None);
        assert_eq!(StackLabeler::standard().label(""), None);
    }

    #[test]
    fn test_custom_pattern_without_group() {
        let labeler = StackLabeler::new(r"\w+\.rs").unwrap();
        assert_eq!(labeler.label("at src/lib.rs:3:4").as_deref(), Some("lib.rs"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(StackLabeler::new("(").is_err());
    }

    #[test]
    fn test_caller_frame_round_trip() {
        let frame = caller_frame(Location::caller());
        let label = StackLabeler::standard().label(&frame).unwrap();
        assert!(label.starts_with("stack.rs:"), "{}", label);
        assert_eq!(file_of(&label), "stack.rs");
    }

    #[test]
    fn test_deterministic() {
        let stack = "at x/y/z.rs:10:2";
        let a = StackLabeler::standard().label(stack);
        let b = StackLabeler::standard().label(stack);
        assert_eq!(a, b);
    }
}
