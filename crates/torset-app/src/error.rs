//! # Design
//!
//! - Centralize application-level errors for bootstrap and scheduling.
//! - Keep error messages constant while carrying context fields for debugging.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: torset_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: torset_telemetry::TelemetryError,
    },
    /// A downloader adapter could not be constructed.
    #[error("downloader adapter construction failed")]
    Adapter {
        /// Name of the downloader endpoint.
        downloader: String,
        /// Source adapter error.
        source: torset_core::AdapterError,
    },
    /// A setting required by the enabled configuration was absent.
    #[error("missing setting")]
    MissingSetting {
        /// Name of the missing setting.
        field: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: torset_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: torset_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}
