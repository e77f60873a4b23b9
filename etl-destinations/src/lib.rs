//! ETL output implementations.
//!
//! Provides implementations of the [`etl::output::OutputPlugin`] trait for analytical data
//! warehouses.

#[cfg(feature = "maxcompute")]
pub mod maxcompute;
