//! Tracing setup for services and tests embedding the MaxCompute output.

pub mod tracing;
