//! Core building blocks for bulk loading rows into analytical destinations.
//!
//! The crate defines the shared error type, the row and report types, the pull-style
//! [`source::RowSource`] and the [`output::OutputPlugin`] trait the host drives, plus the retry
//! timing used by destinations.

pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod source;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod types;
