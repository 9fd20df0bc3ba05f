//! The context helpers every crate's error module shares.

use std::fmt::Display;

/// Error types that wrap a plain message.
///
/// Implement it for a crate's `Error`, then call [`impl_context!`] in the
/// same module to get `.context()` and `.with_context()` on `Result` and
/// `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;

    /// `"<context>: <source>"`.
    fn with_source(context: &str, source: impl Display) -> Self {
        Self::from_message(format!("{context}: {source}"))
    }
}

/// Define a crate-local `Context` trait for the `Error` and `Result` in
/// scope.
///
/// ```ignore
/// // crates/persistence/src/error.rs
/// meshtrace_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        /// Attach a message to a failed result or a missing value.
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context)
            }

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::with_source(&f().into(), source)
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context)
            }

            fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    mod scratch {
        #[derive(Debug, PartialEq)]
        pub struct Error(pub String);

        impl crate::FromMessage for Error {
            fn from_message(message: String) -> Self {
                Self(message)
            }
        }

        pub type Result<T> = std::result::Result<T, Error>;

        crate::impl_context!();
    }

    use scratch::{Context, Error};

    #[test]
    fn result_context_keeps_the_source() {
        let failed: Result<(), &str> = Err("disk full");
        assert_eq!(
            failed.context("saving hop_nodes").unwrap_err(),
            Error("saving hop_nodes: disk full".into())
        );
    }

    #[test]
    fn missing_option_becomes_the_message() {
        let missing: Option<u8> = None;
        let err = missing
            .with_context(|| format!("no node {}", "a1b2"))
            .unwrap_err();
        assert_eq!(err, Error("no node a1b2".into()));
        assert_eq!(Some(3).context("unused").unwrap(), 3);
    }
}
