//! Periodic statistics output: newline-delimited JSON flow snapshots
//! written to disk, plus a small Prometheus metrics endpoint.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use prometheus::{IntCounter, IntGauge, Registry};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use refinery_capture::CaptureStats;

use crate::flowcache::FlowCache;

const OUT_VERSION: &str = "3.0";

#[derive(Serialize)]
struct OutJson<'a> {
    #[serde(rename = "Version")]
    version: &'a str,
    #[serde(rename = "Conf")]
    conf: &'a str,
    #[serde(rename = "Type")]
    ty: &'a str,
    #[serde(rename = "TsStart")]
    ts_start: i64,
    #[serde(rename = "TsEnd")]
    ts_end: i64,
    #[serde(rename = "Data")]
    data: serde_json::Value,
}

/// Process-wide counters exposed on the metrics endpoint.
pub struct Metrics {
    pub packets_processed: IntCounter,
    pub flows_active: IntGauge,
    pub flows_evicted: IntCounter,
    pub dns_answers_observed: IntCounter,
    pub decode_errors: IntCounter,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let packets_processed = IntCounter::new("tr_packets_processed_total", "Packets classified").unwrap();
        let flows_active = IntGauge::new("tr_flows_active", "Flows currently tracked").unwrap();
        let flows_evicted = IntCounter::new("tr_flows_evicted_total", "Flows evicted for inactivity").unwrap();
        let dns_answers_observed =
            IntCounter::new("tr_dns_answers_observed_total", "DNS answers parsed").unwrap();
        let decode_errors = IntCounter::new("tr_decode_errors_total", "Frames that failed to decode").unwrap();

        registry.register(Box::new(packets_processed.clone())).unwrap();
        registry.register(Box::new(flows_active.clone())).unwrap();
        registry.register(Box::new(flows_evicted.clone())).unwrap();
        registry.register(Box::new(dns_answers_observed.clone())).unwrap();
        registry.register(Box::new(decode_errors.clone())).unwrap();

        Self {
            packets_processed,
            flows_active,
            flows_evicted,
            dns_answers_observed,
            decode_errors,
            registry,
        }
    }

    fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            error!("failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serves `/metrics` on `addr` until the task is dropped.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Metrics endpoint listening on {}", addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                    let body = metrics.gather();
                    async move { Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from(body)))) }
                });

                if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await {
                    debug!("metrics connection error: {}", e);
                }
            });
        }
    }
}

/// Writes one NDJSON line per cycle from `flow_cache.dump()`.
///
/// When `append` is false, each cycle is written to a fresh temp file
/// which is then renamed over the previous output, matching the
/// reference implementation's tmp-file-then-rename rotation. When
/// `append` is true, lines are appended to a single file that is
/// rotated (renamed with a timestamp suffix) once per hour.
pub struct CacheDumpWriter {
    flow_cache: Arc<FlowCache>,
    out_dir: PathBuf,
    base_name: String,
    append: bool,
    last_ts: i64,
    current_file: Option<File>,
    rotation_start: i64,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl CacheDumpWriter {
    pub fn new(flow_cache: Arc<FlowCache>, out_dir: impl Into<PathBuf>, base_name: impl Into<String>, append: bool) -> Self {
        Self {
            flow_cache,
            out_dir: out_dir.into(),
            base_name: base_name.into(),
            append,
            last_ts: unix_now(),
            current_file: None,
            rotation_start: unix_now(),
        }
    }

    fn out_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.out", self.base_name))
    }

    fn rotated_path(&self, ts: i64) -> PathBuf {
        self.out_dir.join(format!("{}.{}.out", self.base_name, ts))
    }

    /// Runs one snapshot cycle: dumps and clears the flow cache,
    /// wraps it in the standard envelope, and writes it out.
    pub fn tick(&mut self) {
        let ts_end = unix_now();
        let data = self.flow_cache.dump();

        let out = OutJson {
            version: OUT_VERSION,
            conf: "--",
            ty: "CacheDump",
            ts_start: self.last_ts,
            ts_end,
            data: serde_json::Value::Array(data),
        };
        self.last_ts = ts_end;

        let line = match serde_json::to_string(&out) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to serialize cache dump: {}", e);
                return;
            }
        };

        if let Err(e) = self.write_line(&line, ts_end) {
            error!("failed to write stats output: {}", e);
        }
    }

    fn write_line(&mut self, line: &str, ts_end: i64) -> std::io::Result<()> {
        if !self.append {
            let tmp_path = self.out_dir.join(format!("tmp.{}", self.base_name));
            let mut tmp = File::create(&tmp_path)?;
            writeln!(tmp, "{line}")?;
            fs::rename(&tmp_path, self.out_path())?;
            return Ok(());
        }

        if self.current_file.is_none() {
            self.current_file = Some(OpenOptions::new().create(true).append(true).open(self.out_path())?);
        }

        // Rotate the append file once an hour, matching the reference
        // printer's rotation period.
        if ts_end - self.rotation_start >= 3600 {
            self.current_file = None;
            fs::rename(self.out_path(), self.rotated_path(self.rotation_start))?;
            self.rotation_start = ts_end;
            self.current_file = Some(OpenOptions::new().create(true).append(true).open(self.out_path())?);
        }

        if let Some(f) = &mut self.current_file {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Periodically drains the flow cache and writes a stats snapshot,
/// until the returned handle is aborted.
pub fn spawn_cache_dump(writer: CacheDumpWriter, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = writer;
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            writer.tick();
        }
    })
}

#[derive(Serialize)]
struct IfStatsEntry<'a> {
    #[serde(rename = "Interface")]
    interface: &'a str,
    #[serde(rename = "PacketsCaptured")]
    packets_captured: u64,
    #[serde(rename = "BytesCaptured")]
    bytes_captured: u64,
    #[serde(rename = "PacketsDropped")]
    packets_dropped: u64,
    #[serde(rename = "ParseErrors")]
    parse_errors: u64,
}

/// Periodically writes a snapshot of each tracked interface's capture
/// counters, in the same NDJSON envelope as the cache dump output.
pub struct IfStatsWriter {
    sources: Vec<(String, Arc<CaptureStats>)>,
    out_dir: PathBuf,
    base_name: String,
    last_ts: i64,
}

impl IfStatsWriter {
    pub fn new(sources: Vec<(String, Arc<CaptureStats>)>, out_dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            sources,
            out_dir: out_dir.into(),
            base_name: base_name.into(),
            last_ts: unix_now(),
        }
    }

    pub fn tick(&mut self) {
        let ts_end = unix_now();
        let entries: Vec<IfStatsEntry> = self
            .sources
            .iter()
            .map(|(name, stats)| {
                let snap = stats.snapshot();
                IfStatsEntry {
                    interface: name,
                    packets_captured: snap.packets_captured,
                    bytes_captured: snap.bytes_captured,
                    packets_dropped: snap.packets_dropped,
                    parse_errors: snap.parse_errors,
                }
            })
            .collect();

        let out = OutJson {
            version: OUT_VERSION,
            conf: "--",
            ty: "IfStats",
            ts_start: self.last_ts,
            ts_end,
            data: serde_json::to_value(entries).unwrap_or(serde_json::Value::Null),
        };
        self.last_ts = ts_end;

        let line = match serde_json::to_string(&out) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to serialize interface stats: {}", e);
                return;
            }
        };

        let path = self.out_dir.join(format!("{}.ifstats.out", self.base_name));
        if let Err(e) = fs::write(&path, format!("{line}\n")) {
            error!("failed to write interface stats: {}", e);
        }
    }
}

pub fn spawn_ifstats(writer: IfStatsWriter, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = writer;
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            writer.tick();
        }
    })
}

pub fn ensure_out_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registers_without_panicking() {
        let metrics = Metrics::new();
        metrics.packets_processed.inc();
        let body = metrics.gather();
        assert!(body.contains("tr_packets_processed_total"));
    }

    #[test]
    fn test_write_line_creates_output_file() {
        let dir = std::env::temp_dir().join(format!("tr-stats-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let smap = Arc::new(crate::servicemap::ServiceMap::new(std::time::Duration::from_secs(600)));
        let flow_cache =
            Arc::new(crate::flowcache::FlowCache::new(smap, std::time::Duration::from_secs(600), 2, None).unwrap());
        let mut writer = CacheDumpWriter::new(flow_cache, &dir, "tr", false);
        writer.tick();

        assert!(dir.join("tr.out").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
