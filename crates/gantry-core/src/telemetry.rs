//! Rolling telemetry windows fed by socket `stats` ticks.

use crate::client::types::SocketEvent;
use crate::types::PowerState;
use crate::ws::ServerEvent;
use serde::Deserialize;

/// Samples kept per series.
pub const SERIES_LEN: usize = 21;

/// Seed value meaning "no data yet".
pub const NO_DATA: f64 = -5.0;

const MIB: u64 = 1024 * 1024;

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Fixed-length ring of samples, oldest first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Series {
    samples: [f64; SERIES_LEN],
    precision: u32,
}

impl Series {
    pub fn new(precision: u32) -> Self {
        Self {
            samples: [NO_DATA; SERIES_LEN],
            precision,
        }
    }

    /// Drop the oldest sample and append `value` rounded to this series'
    /// precision.
    pub fn push(&mut self, value: f64) {
        self.samples.copy_within(1.., 0);
        self.samples[SERIES_LEN - 1] = round_to(value, self.precision);
    }

    pub fn clear(&mut self) {
        self.samples = [NO_DATA; SERIES_LEN];
    }

    pub fn samples(&self) -> &[f64; SERIES_LEN] {
        &self.samples
    }

    pub fn latest(&self) -> Option<f64> {
        let last = self.samples[SERIES_LEN - 1];
        (last != NO_DATA).then_some(last)
    }
}

/// Several series advanced together by one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Chart {
    series: Vec<Series>,
}

impl Chart {
    pub fn new(count: usize, precision: u32) -> Self {
        Self {
            series: vec![Series::new(precision); count],
        }
    }

    /// Push one value per series. A single value is pushed to every series.
    /// A slice of any other length is ignored.
    pub fn push(&mut self, values: &[f64]) {
        match values {
            [value] => self.series.iter_mut().for_each(|s| s.push(*value)),
            _ if values.len() == self.series.len() => {
                for (series, value) in self.series.iter_mut().zip(values) {
                    series.push(*value);
                }
            }
            _ => log::warn!(
                "Chart push with {} values for {} series ignored",
                values.len(),
                self.series.len()
            ),
        }
    }

    pub fn clear(&mut self) {
        self.series.iter_mut().for_each(Series::clear);
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }
}

// ── Stats payload ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NetworkCounters {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

/// Body of a `stats` event.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatsPayload {
    #[serde(default)]
    pub cpu_absolute: f64,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub network: NetworkCounters,
    #[serde(default)]
    pub uptime: u64,
}

impl StatsPayload {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Latest values that are shown as text rather than charted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveStats {
    pub uptime_secs: u64,
    pub disk_bytes: u64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_percent: f64,
}

/// Read-only copy of the aggregator state handed to renderers.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetrySnapshot {
    pub cpu: [f64; SERIES_LEN],
    pub memory_mib: [f64; SERIES_LEN],
    pub network_rx: [f64; SERIES_LEN],
    pub network_tx: [f64; SERIES_LEN],
    pub live: Option<LiveStats>,
}

// ── Aggregator ─────────────────────────────────────────────────────────────

pub struct TelemetryAggregator {
    cpu: Series,
    memory: Series,
    /// `[rx, tx]` bytes per tick
    network: Chart,
    previous: Option<NetworkCounters>,
    live: Option<LiveStats>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self {
            cpu: Series::new(2),
            memory: Series::new(0),
            network: Chart::new(2, 0),
            previous: None,
            live: None,
        }
    }

    /// Advance every series from a raw `stats` payload. Malformed payloads
    /// are dropped and nothing advances.
    pub fn push_stats(&mut self, raw: &str) -> bool {
        match StatsPayload::parse(raw) {
            Ok(payload) => {
                self.push(&payload);
                true
            }
            Err(e) => {
                log::warn!("Dropping malformed stats payload: {}", e);
                false
            }
        }
    }

    pub fn push(&mut self, payload: &StatsPayload) {
        self.cpu.push(payload.cpu_absolute);
        self.memory.push((payload.memory_bytes / MIB) as f64);

        let current = &payload.network;
        let (rx, tx) = match &self.previous {
            Some(prev) => (
                current.rx_bytes.saturating_sub(prev.rx_bytes),
                current.tx_bytes.saturating_sub(prev.tx_bytes),
            ),
            None => (0, 0),
        };
        self.network.push(&[rx as f64, tx as f64]);
        self.previous = Some(current.clone());

        self.live = Some(LiveStats {
            uptime_secs: payload.uptime,
            disk_bytes: payload.disk_bytes,
            memory_bytes: payload.memory_bytes,
            memory_limit_bytes: payload.memory_limit_bytes,
            cpu_percent: payload.cpu_absolute,
        });
    }

    /// Reset all series to [`NO_DATA`] and forget the previous counters.
    pub fn clear(&mut self) {
        self.cpu.clear();
        self.memory.clear();
        self.network.clear();
        self.previous = None;
        self.live = None;
    }

    pub fn on_event(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::Open => self.previous = None,
            SocketEvent::Closed { .. } | SocketEvent::ConnectError => self.clear(),
            SocketEvent::Server(ServerEvent::Stats(raw)) => {
                self.push_stats(raw);
            }
            SocketEvent::Server(ServerEvent::Status(state)) => {
                if PowerState::from_wire(state) == Some(PowerState::Offline) {
                    self.clear();
                }
            }
            _ => {}
        }
    }

    pub fn cpu(&self) -> &Series {
        &self.cpu
    }

    pub fn memory(&self) -> &Series {
        &self.memory
    }

    pub fn network(&self) -> &Chart {
        &self.network
    }

    pub fn live(&self) -> Option<&LiveStats> {
        self.live.as_ref()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let network = self.network.series();
        TelemetrySnapshot {
            cpu: *self.cpu.samples(),
            memory_mib: *self.memory.samples(),
            network_rx: *network[0].samples(),
            network_tx: *network[1].samples(),
            live: self.live.clone(),
        }
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new()
    }
}
