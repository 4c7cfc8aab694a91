//! wagate Common - Shared types and configuration for the wagate services.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.wagate/config.json` + `secrets.json`)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - WhatsApp JID normalization
//! - Small utility functions

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod jid;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    AuthConfig, ChatwootConfig, Config, DatabaseConfig, NetworkConfig, ObservabilityConfig,
    ReconnectConfig, SessionsConfig, WebhookConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
