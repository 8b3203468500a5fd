use std::fmt;

use strum::{FromRepr, IntoStaticStr};

/// Result code returned by every command handler, separating outcomes by severity.
///
/// The numeric representation is part of the command contract: `0` is success,
/// positive values are non-critical diagnostics (reported, the task queue keeps
/// draining), negative values are critical (the current task queue stops).
/// `return <int>` converts a raw integer back into a code via [`ErrorCode::from_repr`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Success.
    None = 0,
    /// A command received fewer positional arguments than it requires.
    TooFewArgs = 1,
    /// A command received more positional arguments than it accepts.
    TooManyArgs = 2,
    /// An unrecognized `--flag` was passed to a command.
    UnknownArg = 3,
    /// A handler reported a domain-specific non-critical failure (e.g. `error ...`).
    CustomError = 4,
    /// Writing a renderer snapshot failed.
    SnapshotFailed = 5,
    /// A referenced file could not be loaded or parsed.
    CriticalInvalidFile = -1,
    /// A functioncall string did not resolve to any known command.
    CriticalFunctioncallInvalid = -2,
    /// The command exists but its implementation is a stub.
    CriticalFunctionNotImplemented = -3,
    /// An `assert` predicate evaluated to zero or NaN.
    CriticalCustomAssert = -4,
    /// The requested feature is recognized but not built.
    FeatureNotImplemented = -5,
}

impl ErrorCode {
    /// Critical codes abort the task queue that produced them.
    #[inline]
    #[must_use]
    pub fn is_critical(self) -> bool {
        (self as i32) < 0
    }

    /// Raw numeric form, matching the process exit-code convention.
    #[inline]
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.into();
        write!(f, "{name}")
    }
}

/// Outcome of draining one task queue.
///
/// Codes are collected in execution order. When a critical code appears the
/// drain stops and `stopped_at_critical` is set; the codes gathered so far are
/// kept so callers can report the full ordered history.
#[derive(Debug, Clone, Default)]
pub struct TaskQueueResult {
    pub stopped_at_critical: bool,
    pub codes: Vec<ErrorCode>,
}

impl TaskQueueResult {
    /// Records one command result, returning `true` while draining may continue.
    pub(crate) fn record(&mut self, code: ErrorCode) -> bool {
        self.codes.push(code);
        if code.is_critical() {
            self.stopped_at_critical = true;
        }
        !self.stopped_at_critical
    }

    /// First critical code, if the drain was stopped.
    #[must_use]
    pub fn critical(&self) -> Option<ErrorCode> {
        self.codes.iter().copied().find(|c| c.is_critical())
    }
}

/// Error raised while parsing an expression source string.
///
/// Kept distinct from [`DocError`] and [`ErrorCode`] so callers can handle
/// compile-stage failures (bad rule files) separately from run-stage ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the source string where the problem was detected.
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Error raised by document path operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// The key string is empty or contains an empty/malformed segment.
    InvalidKey(String),
    /// A path segment exists but is a scalar, so descending through it is refused.
    ScalarAncestor { key: String, segment: String },
    /// An array was indexed with a non-numeric or malformed bracket expression.
    BadIndex(String),
    /// Input text was not valid JSON or JSONC.
    Malformed(String),
}

impl fmt::Display for DocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid key {key:?}"),
            Self::ScalarAncestor { key, segment } => {
                write!(f, "cannot descend through scalar segment {segment:?} in {key:?}")
            }
            Self::BadIndex(key) => write!(f, "malformed array index in {key:?}"),
            Self::Malformed(detail) => write!(f, "malformed document: {detail}"),
        }
    }
}

impl std::error::Error for DocError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criticality_follows_sign() {
        assert!(!ErrorCode::None.is_critical());
        assert!(!ErrorCode::CustomError.is_critical());
        assert!(ErrorCode::CriticalCustomAssert.is_critical());
        assert!(ErrorCode::FeatureNotImplemented.is_critical());
    }

    #[test]
    fn from_repr_round_trips() {
        assert_eq!(ErrorCode::from_repr(0), Some(ErrorCode::None));
        assert_eq!(ErrorCode::from_repr(-4), Some(ErrorCode::CriticalCustomAssert));
        assert_eq!(ErrorCode::from_repr(99), None);
    }

    #[test]
    fn queue_result_stops_on_critical() {
        let mut result = TaskQueueResult::default();
        assert!(result.record(ErrorCode::None));
        assert!(result.record(ErrorCode::CustomError));
        assert!(!result.record(ErrorCode::CriticalInvalidFile));
        assert!(result.stopped_at_critical);
        assert_eq!(result.critical(), Some(ErrorCode::CriticalInvalidFile));
        assert_eq!(result.codes.len(), 3);
    }
}
