//! Configuration for the MaxCompute output and the services embedding it.
//!
//! Configuration is loaded from `configuration/base.*`, an environment specific file selected by
//! `APP_ENVIRONMENT`, and `APP_`-prefixed environment variables, in that order.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
