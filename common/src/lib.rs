//! Functionality for the soft Keymaster that is common across the crypto backends and the engine.

#![no_std]
extern crate alloc;

use alloc::string::String;
use core::fmt::Write;
use wire::keymint::ErrorCode;

/// Re-export of the crate that holds the Keymaster vocabulary.
pub use skm_wire as wire;
pub use skm_wire::{
    try_to_vec, vec_try, vec_try_with_capacity, AllocationFailed, FallibleAllocExt,
};

pub mod crypto;
pub mod keyblob;
pub mod tag;

/// General error type.
#[derive(Debug)]
pub enum Error {
    Hal(ErrorCode, String),
    Alloc(&'static str),
    Der(der::ErrorKind),
}

// The following macros for error generation allow the message portion to be automatically
// compiled out in future, avoiding potential information leakage and allocation.

/// Macro to build an [`Error::Hal`] instance for a specific [`ErrorCode`] value known at compile time:
/// `km_err!(InvalidTag, "some {} format", arg)`.
#[macro_export]
macro_rules! km_err {
    { $error_code:ident, $($arg:tt)+ } => {
        $crate::Error::Hal($crate::wire::keymint::ErrorCode::$error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

/// Macro to build an [`Error::Hal`] instance:
/// `km_verr!(rc, "some {} format", arg)`.
#[macro_export]
macro_rules! km_verr {
    { $error_code:expr, $($arg:tt)+ } => {
        $crate::Error::Hal($error_code,
                           alloc::format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))) };
}

impl Error {
    /// Return the [`ErrorCode`] that this error would be reported as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Hal(rc, _msg) => *rc,
            Error::Alloc(_msg) => ErrorCode::MemoryAllocationFailed,
            Error::Der(_kind) => ErrorCode::UnknownError,
        }
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        e.code()
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_e: alloc::collections::TryReserveError) -> Self {
        Error::Alloc("allocation of Vec failed")
    }
}

impl From<AllocationFailed> for Error {
    fn from(_e: AllocationFailed) -> Self {
        Error::Alloc("allocation failed")
    }
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Error::Der(e.kind())
    }
}

impl From<core::num::TryFromIntError> for Error {
    fn from(e: core::num::TryFromIntError) -> Self {
        km_err!(InvalidArgument, "value outside of valid range: {:?}", e)
    }
}

/// Check for an expected error.
#[macro_export]
macro_rules! expect_err {
    ($result:expr, $err_msg:expr) => {
        assert!(
            $result.is_err(),
            "Expected error containing '{}', got success {:?}",
            $err_msg,
            $result
        );
        let err = $result.err();
        assert!(
            alloc::format!("{:?}", err).contains($err_msg),
            "Unexpected error {:?}, doesn't contain '{}'",
            err,
            $err_msg
        );
    };
}

/// Convert data to a hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut result = String::new();
    for byte in data {
        let _ = &write!(result, "{:02x}", byte);
    }
    result
}
