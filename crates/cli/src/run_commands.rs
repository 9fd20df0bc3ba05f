//! Driving the engine from an event stream and wall-clock timers.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    anyhow::{Context, Result},
    meshtrace_common::time::now_ms,
    meshtrace_config::MeshtraceConfig,
    meshtrace_correlation::RawEvent,
    meshtrace_engine::{FileExportSink, MeshEngine, Tick},
    meshtrace_identity::{FileRegistry, InMemoryRegistry, NodeRegistry},
    meshtrace_persistence::FileDocumentStore,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, BufReader},
        time::{Instant, Interval, MissedTickBehavior, interval_at},
    },
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use meshtrace_metrics::{
    MetricsHandle, MetricsRecorderConfig, counter, events as event_metrics, labels,
};

const METRICS_FILE: &str = "metrics.prom";

struct Host {
    engine: MeshEngine,
    #[cfg(feature = "metrics")]
    metrics: MetricsHandle,
    prometheus_export: bool,
}

impl Host {
    fn open(config: &MeshtraceConfig) -> Result<Self> {
        #[cfg(feature = "metrics")]
        let metrics = meshtrace_metrics::init_metrics(MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: vec![("service".into(), "meshtrace".into())],
        })?;

        let registry: Arc<dyn NodeRegistry> = match &config.registry.path {
            Some(path) => Arc::new(
                FileRegistry::open(path)
                    .with_context(|| format!("failed to open registry {}", path.display()))?,
            ),
            None => {
                info!("no registry file configured, nodes are kept in memory");
                Arc::new(InMemoryRegistry::new())
            },
        };

        let data_dir = config.data_dir();
        let export_dir = config.export_dir();
        info!(
            data_dir = %data_dir.display(),
            export_dir = %export_dir.display(),
            "storage ready"
        );
        let documents = Arc::new(FileDocumentStore::new(data_dir));
        let sink = Arc::new(FileExportSink::new(export_dir));

        Ok(Self {
            engine: MeshEngine::open(config, registry, documents, sink, now_ms()),
            #[cfg(feature = "metrics")]
            metrics,
            prometheus_export: config.metrics.prometheus_export,
        })
    }

    fn handle_line(&mut self, line: &str) {
        match RawEvent::from_json_line(line) {
            Ok(Some(event)) => {
                if let Err(e) = self.engine.handle_event(&event, now_ms()) {
                    warn!(kind = event.kind(), error = %e, "event rejected");
                }
            },
            Ok(None) => {
                debug!("event ignored");
                #[cfg(feature = "metrics")]
                counter!(event_metrics::SKIPPED_TOTAL, labels::KIND => "untracked").increment(1);
            },
            Err(e) => {
                warn!(error = %e, "skipping malformed event line");
                #[cfg(feature = "metrics")]
                counter!(event_metrics::SKIPPED_TOTAL, labels::KIND => "malformed").increment(1);
            },
        }
    }

    fn tick(&mut self, tick: Tick) {
        match self.engine.on_tick(tick, now_ms()) {
            Ok(report) => debug!(
                ?tick,
                saved = report.saved.len(),
                exported = report.exported.len(),
                "tick done"
            ),
            Err(e) => error!(?tick, error = %e, "tick failed"),
        }
        if tick == Tick::Export {
            self.write_metrics();
        }
    }

    fn write_metrics(&self) {
        if !self.prometheus_export {
            return;
        }
        #[cfg(feature = "metrics")]
        if let Err(e) = self
            .engine
            .sink()
            .write_text(METRICS_FILE, &self.metrics.render())
        {
            warn!(error = %e, "failed to write metrics");
        }
        #[cfg(not(feature = "metrics"))]
        warn!(file = METRICS_FILE, "metrics export requested but the metrics feature is off");
    }

    /// Final save, snapshot and export.
    fn shutdown(&mut self) {
        self.tick(Tick::Save);
        self.tick(Tick::Snapshot);
        self.tick(Tick::Export);
        info!("state flushed");
    }
}

fn timer(secs: u64) -> Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Follow `events` (or stdin) until it ends or the process is interrupted.
pub async fn run(config: MeshtraceConfig, events: Option<PathBuf>) -> Result<()> {
    let mut host = Host::open(&config)?;

    let reader: Box<dyn AsyncBufRead + Unpin> = match &events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        },
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let mut save = timer(config.persistence.save_interval_secs);
    let mut snapshot = timer(config.snapshots.interval_secs);
    let mut export = timer(config.export.interval_secs);
    let mut refresh = timer(config.identity.rebuild_throttle_secs);

    info!(
        source = %events.as_deref().map_or_else(|| "stdin".into(), |p| p.display().to_string()),
        "following events"
    );
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => host.handle_line(&line),
                Ok(None) => {
                    info!("event stream ended");
                    break;
                },
                Err(e) => {
                    error!(error = %e, "failed to read event stream");
                    break;
                },
            },
            _ = save.tick() => host.tick(Tick::Save),
            _ = snapshot.tick() => host.tick(Tick::Snapshot),
            _ = export.tick() => host.tick(Tick::Export),
            _ = refresh.tick() => host.tick(Tick::RefreshLocations),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            },
        }
    }

    host.shutdown();
    Ok(())
}

/// Process every line of `file`, then save, snapshot and export once.
pub fn replay(config: MeshtraceConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut host = Host::open(&config)?;

    let mut lines = 0usize;
    for line in content.lines() {
        host.handle_line(line);
        lines += 1;
    }
    info!(file = %file.display(), lines, "replay finished");

    host.shutdown();
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn replay_writes_state_and_exports() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        let mut config = MeshtraceConfig::default();
        config.storage.data_dir = Some(data.clone());
        config.metrics.enabled = false;

        let events = tmp.path().join("events.jsonl");
        std::fs::write(
            &events,
            concat!(
                r#"{"kind":"contact_update","key":"a1b2c3d4e5f6","adv_name":"Alice","adv_lat":10.0,"adv_lon":20.0,"last_snr":3.5}"#,
                "\n",
                "not json\n",
                "\n",
                r#"{"kind":"advertisement","sender_key":"a1b2c3d4e5f6","snr":4.0}"#,
                "\n",
            ),
        )
        .unwrap();

        replay(config, &events).unwrap();

        for name in ["hops_sensors", "last_messages", "hop_nodes", "direct_links"] {
            assert!(data.join(format!("{name}.json")).exists(), "{name} missing");
        }
        for name in ["heatmap", "directlinks", "nodemap", "hop_entities", "path_entities"] {
            assert!(
                data.join("export").join(format!("{name}.json")).exists(),
                "{name} export missing"
            );
        }
        let sensors: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(data.join("hops_sensors.json")).unwrap())
                .unwrap();
        assert_eq!(sensors["count"], 1);
        assert_eq!(sensors["sensors"]["a1b2c3d4e5f6"]["attributes"]["snr"], 4.0);
    }

    #[test]
    fn replay_of_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let config = MeshtraceConfig::default();
        assert!(replay(config, &tmp.path().join("absent.jsonl")).is_err());
    }
}
