use crate::config::AlertsConfig;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKey {
    Cpu,
    GpuTemp,
    Ram,
    Vram,
    NetUp,
    NetDown,
}

impl MetricKey {
    pub const ALL: [MetricKey; 6] = [
        MetricKey::Cpu,
        MetricKey::GpuTemp,
        MetricKey::Ram,
        MetricKey::Vram,
        MetricKey::NetUp,
        MetricKey::NetDown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::Cpu => "cpu",
            MetricKey::GpuTemp => "gpu_temp",
            MetricKey::Ram => "ram",
            MetricKey::Vram => "vram",
            MetricKey::NetUp => "net_up",
            MetricKey::NetDown => "net_down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Normal,
    Warn,
    Critical,
}

impl AlertLevel {
    pub fn classify(value: f64, thresholds: &AlertsConfig) -> Self {
        if value >= thresholds.critical_at {
            AlertLevel::Critical
        } else if value >= thresholds.warn_at {
            AlertLevel::Warn
        } else {
            AlertLevel::Normal
        }
    }

    pub fn as_gauge(self) -> f64 {
        match self {
            AlertLevel::Normal => 0.0,
            AlertLevel::Warn => 1.0,
            AlertLevel::Critical => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub value: f64,
    pub alert: Option<AlertLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RunningMaxima(BTreeMap<MetricKey, f64>);

impl Default for RunningMaxima {
    fn default() -> Self {
        Self(MetricKey::ALL.iter().map(|k| (*k, 0.0)).collect())
    }
}

impl RunningMaxima {
    pub fn observe(&mut self, key: MetricKey, value: f64) {
        let entry = self.0.entry(key).or_insert(0.0);
        if value > *entry {
            *entry = value;
        }
    }

    pub fn get(&self, key: MetricKey) -> f64 {
        self.0.get(&key).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        for v in self.0.values_mut() {
            *v = 0.0;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub taken_at_unix: i64,
    pub samples: BTreeMap<MetricKey, MetricSample>,
    pub maxima: RunningMaxima,
    pub interface: Option<String>,
}

impl Snapshot {
    pub fn sample(&self, key: MetricKey) -> Option<&MetricSample> {
        self.samples.get(&key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Active,
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub snapshot: Snapshot,
    pub visibility: Visibility,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn publish(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }
}
