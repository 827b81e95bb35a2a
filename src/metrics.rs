// src/metrics.rs
//! Run metrics. Recorded through the `metrics` facade everywhere; the binary
//! optionally installs a Prometheus recorder and dumps the exposition to a
//! textfile after the run (node-exporter textfile collector).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register help texts once per process.
pub fn ensure_metrics_described() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("digest_fetch_total", "Source fetches by outcome");
        describe_counter!("digest_parse_failures_total", "Changed sources whose parse failed");
        describe_counter!("digest_chunks_sent_total", "Chunks acknowledged by the transport");
        describe_counter!("digest_runs_total", "Pipeline runs by outcome");
        describe_gauge!("digest_last_run_ts", "Unix time of the last finished run");
    });
}

pub struct TextfileExporter {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl TextfileExporter {
    /// Install the global Prometheus recorder. Call at most once per process.
    pub fn install(path: PathBuf) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        ensure_metrics_described();
        Ok(Self { handle, path })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Replace the textfile atomically so the collector never reads a partial file.
    pub fn write(&self) -> Result<()> {
        write_atomic(&self.path, &self.render())
            .with_context(|| format!("writing metrics to {}", self.path.display()))
    }
}

fn write_atomic(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("prom.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(body.as_bytes())?;
    f.sync_all()?;
    fs::rename(tmp, path)
}
