//! Common types shared by row sources and outputs.
//!
//! Rows are ordered [`Cell`] values described by a slice of [`ColumnSchema`]s. Every output task
//! ends with a [`TaskReport`] that the host pipeline consumes.

mod cell;
mod report;
mod schema;
mod sized;
mod table_row;

pub use cell::*;
pub use report::*;
pub use schema::*;
pub use sized::*;
pub use table_row::*;
