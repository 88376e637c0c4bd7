// src/context.rs
//! Context extension traits + macros for error handling.
//!
//! - `.context()` / `.with_context()` on any `Result` whose error converts into [`StageError`].
//! - The same on `Option`, turning `None` into a custom error.
//! - `bail!` and `ensure!`, both accepting either a message or a ready-made error value.

use crate::error::{Result, StageError};

/// Extension trait giving you `.context()` / `.with_context()` on any `Result`.
pub trait Context<T, E> {
    /// Add static or owned context (eager — use only when cheap).
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    /// Add context lazily; the closure only runs on the error path.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<StageError>,
{
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(Into::<StageError>::into(err).context(context)),
        }
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(Into::<StageError>::into(err).context(f())),
        }
    }
}

/// Extension trait for `Option<T>` → `Result<T, StageError>` with context.
pub trait OptionContext<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> OptionContext<T> for Option<T> {
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.ok_or_else(|| StageError::custom(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| StageError::custom(f()))
    }
}

// ====================== CONVENIENCE MACROS ======================

/// Early return with an error — `bail!("msg")`, `bail!(err)` or formatted.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::StageError::msg($msg))
    };
    ($err:expr $(,)?) => {
        return Err(Into::<$crate::error::StageError>::into($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::StageError::format(format_args!($fmt, $($arg)*)))
    };
}

/// Ensure a condition is true, else `bail!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !($cond) {
            $crate::bail!($msg);
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($fmt, $($arg)*);
        }
    };
}
