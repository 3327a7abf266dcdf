//! Application state for the multidim API.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;

use dataset_reader::{DatasetService, ReaderConfig};

/// Shared application state.
pub struct AppState {
    /// Dataset access with cached metadata.
    pub service: DatasetService,

    /// Renders the Prometheus exposition; `None` when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new AppState from environment configuration.
    pub fn from_env() -> Result<Self> {
        let config = ReaderConfig::from_env();
        let service = DatasetService::new(config)?;
        Ok(Self::new(service))
    }

    pub fn new(service: DatasetService) -> Self {
        Self {
            service,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
