//! Helpers shared by the tests of output plugins.

#[cfg(feature = "failpoints")]
pub mod failpoints;
