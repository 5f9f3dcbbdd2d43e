//! Configuration module for the game server runner.
//!
//! This module handles parsing and validation of the supervisor's runtime
//! settings. Configurations can be loaded from JSON or YAML files or strings.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use gameserver_runner::config::{Config, validate_config};
//!
//! let config = Config::from_file("supervisor.yaml").unwrap();
//! validate_config(&config).unwrap();
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use gameserver_runner::config::Config;
//!
//! let config = Config {
//!     subscriber_capacity: 32,
//!     ..Config::default()
//! };
//! assert_eq!(config.console_capacity, 100);
//! ```
mod parser;
pub mod validator;

pub use parser::Config;
pub use validator::validate_config;
