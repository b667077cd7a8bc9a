//! Telemetry sinks for exchange volume, balances and latency.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::UdpSocket;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

/// Telemetry emission failure. Never affects an exchange.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Socket error.
    #[error("Telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for counters, gauges and timers addressed by dotted name.
pub trait TelemetrySink: Send + Sync {
    /// Add `delta` to a counter.
    fn increment(&self, name: &str, delta: i64) -> Result<(), TelemetryError>;

    /// Set a gauge.
    fn gauge(&self, name: &str, value: f64) -> Result<(), TelemetryError>;

    /// Record a duration.
    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), TelemetryError>;
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn increment(&self, _name: &str, _delta: i64) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn gauge(&self, _name: &str, _value: f64) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn timing(&self, _name: &str, _elapsed: Duration) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TimingStats {
    count: u64,
    total_ms: f64,
    max_ms: f64,
}

/// In-process metric registry.
#[derive(Default)]
pub struct Metrics {
    counters: DashMap<String, i64>,
    gauges: DashMap<String, f64>,
    timings: DashMap<String, TimingStats>,
}

impl Metrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Last value of a gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|g| *g)
    }

    /// Number of durations recorded under `name`.
    pub fn timing_count(&self, name: &str) -> u64 {
        self.timings.get(name).map(|t| t.count).unwrap_or(0)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            timings: self
                .timings
                .iter()
                .map(|e| (e.key().clone(), (e.count, e.total_ms, e.max_ms)))
                .collect(),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        for (name, value) in &snapshot.counters {
            let name = prometheus_name(name);
            let _ = writeln!(out, "# TYPE {name} counter\n{name} {value}");
        }
        for (name, value) in &snapshot.gauges {
            let name = prometheus_name(name);
            let _ = writeln!(out, "# TYPE {name} gauge\n{name} {value}");
        }
        for (name, (count, total_ms, max_ms)) in &snapshot.timings {
            let name = prometheus_name(name);
            let _ = writeln!(
                out,
                "# TYPE {name}_ms summary\n{name}_ms_count {count}\n{name}_ms_sum {total_ms}\n{name}_ms_max {max_ms}"
            );
        }
        out
    }
}

impl TelemetrySink for Metrics {
    fn increment(&self, name: &str, delta: i64) -> Result<(), TelemetryError> {
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
        Ok(())
    }

    fn gauge(&self, name: &str, value: f64) -> Result<(), TelemetryError> {
        self.gauges.insert(name.to_string(), value);
        Ok(())
    }

    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), TelemetryError> {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut stats = self.timings.entry(name.to_string()).or_default();
        stats.count += 1;
        stats.total_ms += ms;
        stats.max_ms = stats.max_ms.max(ms);
        Ok(())
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, i64>,
    pub gauges: BTreeMap<String, f64>,
    /// `(count, total_ms, max_ms)` per timer.
    pub timings: BTreeMap<String, (u64, f64, f64)>,
}

fn prometheus_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("arvault_{sanitized}")
}

/// Sink writing the StatsD line protocol over UDP.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Bind a local socket and aim it at `host:port`.
    pub fn connect(host: &str, port: u16, prefix: &str) -> Result<Self, TelemetryError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            prefix: prefix.to_string(),
        })
    }

    fn line(&self, name: &str, value: &str, kind: &str) -> String {
        if self.prefix.is_empty() {
            format!("{name}:{value}|{kind}")
        } else {
            format!("{}.{name}:{value}|{kind}", self.prefix)
        }
    }

    fn send(&self, line: String) -> Result<(), TelemetryError> {
        self.socket.send(line.as_bytes())?;
        Ok(())
    }
}

impl TelemetrySink for StatsdSink {
    fn increment(&self, name: &str, delta: i64) -> Result<(), TelemetryError> {
        self.send(self.line(name, &delta.to_string(), "c"))
    }

    fn gauge(&self, name: &str, value: f64) -> Result<(), TelemetryError> {
        self.send(self.line(name, &value.to_string(), "g"))
    }

    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), TelemetryError> {
        self.send(self.line(name, &elapsed.as_millis().to_string(), "ms"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.increment("volume.USD.acum", 100).unwrap();
        metrics.increment("volume.USD.acum", 5).unwrap();
        metrics.increment("volume.USD.neto", -100).unwrap();
        metrics.gauge("account.1.balance", 42.5).unwrap();
        metrics.timing("exchange.duration", Duration::from_millis(250)).unwrap();

        assert_eq!(metrics.counter("volume.USD.acum"), 105);
        assert_eq!(metrics.counter("volume.USD.neto"), -100);
        assert_eq!(metrics.counter("volume.EUR.acum"), 0);
        assert_eq!(metrics.gauge_value("account.1.balance"), Some(42.5));
        assert_eq!(metrics.timing_count("exchange.duration"), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.increment("volume.ARS.buy", 146900).unwrap();

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE arvault_volume_ars_buy counter"));
        assert!(output.contains("arvault_volume_ars_buy 146900"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.increment("volume.USD.sell", 100).unwrap();
        metrics.gauge("account.2.balance", 60100.0).unwrap();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["counters"]["volume.USD.sell"], 100);
        assert_eq!(json["gauges"]["account.2.balance"], 60100.0);
    }

    #[test]
    fn test_statsd_line_format() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let sink = StatsdSink::connect("127.0.0.1", port, "arVault").unwrap();
        sink.increment("volume.USD.sell", 100).unwrap();

        let mut buf = [0u8; 128];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"arVault.volume.USD.sell:100|c");
    }
}
