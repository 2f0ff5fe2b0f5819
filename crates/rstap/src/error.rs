//! Harness-level errors.
//!
//! Failures inside a test body never surface here: assertion failures, plan
//! mismatches, double ends and panics are all reported in the TAP stream.
//! [`Error`] covers the few conditions that stop the harness itself.

use std::io;
use thiserror::Error;

/// Errors produced by the harness.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The root test never reached its terminal end.
    #[error("End of tests never reached.")]
    Unfinished,

    /// Writing the TAP stream failed.
    #[error("failed to write TAP output: {0}")]
    Io(#[from] io::Error),

    /// A command-line flag or environment variable carried an unusable value.
    #[error("invalid value {value:?} for {flag}")]
    InvalidArg {
        /// The flag or variable name.
        flag: String,
        /// The rejected value.
        value: String,
    },

    /// A flag that takes a value was given none.
    #[error("missing value for {0}")]
    MissingValue(String),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// assert_eq!(rstap::Error::Unfinished.as_label(), "harness_unfinished");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Unfinished => "harness_unfinished",
            Error::Io(_) => "harness_io",
            Error::InvalidArg { .. } => "config_invalid_arg",
            Error::MissingValue(_) => "config_missing_value",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_message_matches_fatal_line() {
        assert_eq!(Error::Unfinished.to_string(), "End of tests never reached.");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "closed").into();
        assert_eq!(err.as_label(), "harness_io");
        assert!(err.to_string().contains("closed"));
    }
}
