//! Failures raised while wiring logging or metrics.

use std::error::Error;
use std::fmt;
use std::string::FromUtf8Error;

use tracing_subscriber::util::TryInitError;

/// Result alias used across this crate.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Where a Prometheus collector failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStage {
    /// Constructing the collector from its options.
    Build,
    /// Adding the collector to the registry.
    Register,
}

impl MetricStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Register => "register",
        }
    }
}

/// Telemetry setup and exposition failures.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    SubscriberInstall {
        /// Error reported by `tracing-subscriber`.
        source: TryInitError,
    },
    /// A reconciliation collector could not be built or registered.
    Metric {
        /// Collector name, e.g. `reconcile_runs_total`.
        name: &'static str,
        /// Step that failed.
        stage: MetricStage,
        /// Error reported by `prometheus`.
        source: prometheus::Error,
    },
    /// Text exposition failed.
    Render {
        /// Error reported by `prometheus`.
        source: prometheus::Error,
    },
    /// Text exposition produced bytes that are not UTF-8.
    RenderUtf8 {
        /// Conversion error.
        source: FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn metric(
        name: &'static str,
        stage: MetricStage,
        source: prometheus::Error,
    ) -> Self {
        Self::Metric {
            name,
            stage,
            source,
        }
    }
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::SubscriberInstall { .. } => "tracing subscriber already installed",
            Self::Metric { stage, .. } => match stage {
                MetricStage::Build => "metric collector could not be built",
                MetricStage::Register => "metric collector could not be registered",
            },
            Self::Render { .. } => "metrics exposition failed",
            Self::RenderUtf8 { .. } => "metrics exposition is not utf-8",
        };
        f.write_str(message)
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::Metric { source, .. } | Self::Render { source } => Some(source),
            Self::RenderUtf8 { source } => Some(source),
        }
    }
}

impl TelemetryError {
    /// Short label of the failing step, for structured log fields.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::SubscriberInstall { .. } => "subscriber",
            Self::Metric { stage, .. } => stage.as_str(),
            Self::Render { .. } | Self::RenderUtf8 { .. } => "render",
        }
    }
}
