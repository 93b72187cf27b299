//! Stable machine-readable error codes.
//!
//! Every error enum in the crate implements [`ErrorCode`] so callers can
//! branch on a fixed `E_*` string instead of matching on display text.

pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
