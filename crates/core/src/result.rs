//! Result type definition and extension traits.
//!
//! Provides combinators for logging failures without unwrap/expect/panic.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for results whose failure is reported and then dropped.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Get the value or a default, logging the error if present.
    fn or_default_logged(self, default: T, context: &str) -> T;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, default: T, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "{context}, using default");
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_into_option_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.into_option_logged("reading"), Some(42));
    }

    #[test]
    fn test_result_into_option_err() {
        let result: Result<i32> = Err(Error::missing_config("port"));
        assert_eq!(result.into_option_logged("reading"), None);
    }

    #[test]
    fn test_result_or_default_logged_err() {
        let result: std::result::Result<i32, &str> = Err("boom");
        assert_eq!(result.or_default_logged(99, "reading"), 99);
    }
}
