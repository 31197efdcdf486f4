//! # Tunnelgate Daemon
//!
//! Enrolls devices into a WireGuard overlay network.
//!
//! An operator initiates an enrollment for a device: the daemon allocates the
//! next overlay address, generates the device's keys, writes its client config
//! and issues a one-time credential of three words. The device later presents
//! those words together with its capability list to `POST /get_config` and
//! receives its config.
//!
//! ## Modules
//!
//! - [`db`] - SQLite pool, migrations and the token word seed
//! - [`store`] - Devices, credentials and capabilities
//! - [`artifacts`] - Client and server config files
//! - [`services`] - The enrollment orchestrator and rate limiting
//! - [`http`] - The redemption endpoint
//! - [`config`] - Settings from TOML and the environment

pub mod artifacts;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod services;
pub mod store;

pub use config::{ConfigError, Settings};
pub use db::Database;
pub use error::{EnrollmentError, StorageError};
pub use services::{DeviceSummary, Enrollment, EnrollmentRateLimiter, OverlayConfig};
