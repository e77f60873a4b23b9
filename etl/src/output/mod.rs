//! Output plugin abstractions.
//!
//! An output plugin receives one [`crate::source::RowSource`] per task and writes its rows to a
//! target system, returning a [`crate::types::TaskReport`].

mod base;
pub mod memory;

pub use base::OutputPlugin;
