//! Metrics recorder initialization and configuration.

use {anyhow::Result, tracing::info};

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Empty when metrics are disabled or the `prometheus` feature is off.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(metrics_exporter_prometheus::PrometheusHandle::render)
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup. With the `prometheus` feature a global Prometheus
/// recorder is installed; otherwise the facade stays a no-op.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or bucket setup fails.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle {
            #[cfg(feature = "prometheus")]
            prometheus_handle: None,
        });
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics recorder initialized");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::buckets,
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(crate::events::HANDLE_DURATION_SECONDS.to_string()),
        &buckets::HANDLE_DURATION,
    )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    // Installs globally without spawning an HTTP listener.
    Ok(builder.install_recorder()?)
}
