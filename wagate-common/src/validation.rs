//! Configuration validation.
//!
//! Every section is checked and all failures are reported together, so an
//! operator fixes a broken config in one pass.

use thiserror::Error;

use crate::config::{
    AuthConfig, Config, DatabaseConfig, NetworkConfig, ObservabilityConfig, SessionsConfig,
    WebhookConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.network,
            &self.auth,
            &self.database,
            &self.sessions,
            &self.webhook,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .flat_map(|e| match e {
                ValidationError::Multiple(inner) => inner,
                other => vec![other],
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides, and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "network.port".into(),
            });
        }
        if self.bind.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "network.bind".into(),
            });
        }
        if let Some(ref url) = self.public_url {
            if !url.trim().is_empty() && !is_http_url(url) {
                return Err(ValidationError::InvalidValue {
                    field: "network.public_url".into(),
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }
}

impl Validate for AuthConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.api_key.as_deref() {
            Some(key) if key.len() < 16 => Err(ValidationError::InvalidValue {
                field: "auth.api_key".into(),
                reason: "must be at least 16 characters".into(),
            }),
            _ => Ok(()),
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ValidationResult<()> {
        let scheme = url::Url::parse(&self.url)
            .map(|u| u.scheme().to_string())
            .map_err(|e| ValidationError::InvalidValue {
                field: "database.url".into(),
                reason: e.to_string(),
            })?;

        if !matches!(scheme.as_str(), "postgres" | "postgresql" | "memory") {
            return Err(ValidationError::InvalidValue {
                field: "database.url".into(),
                reason: format!("unsupported scheme '{scheme}' (expected postgres or memory)"),
            });
        }
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidValue {
                field: "database.max_connections".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SessionsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.data_dir.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "sessions.data_dir".into(),
            });
        }
        if self.qr_limit == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "sessions.qr_limit".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.reconnect.base_delay_ms == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "sessions.reconnect.base_delay_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for WebhookConfig {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(ref url) = self.url {
            if !is_http_url(url) {
                return Err(ValidationError::InvalidValue {
                    field: "webhook.url".into(),
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "webhook.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!(
                    "'{}' is not a valid log level (expected one of: {})",
                    self.log_level,
                    valid_levels.join(", ")
                ),
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("'{}' must be json or pretty", self.log_format),
            });
        }
        Ok(())
    }
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
