use crate::collectors::gpu::{self, GpuReading};
use crate::collectors::network::NetworkSelector;
use crate::collectors::{CpuCounter, MemoryStatus, NetworkCounters, SensorTree, SourceError};
use crate::config::{AlertsConfig, Config};
use crate::state::{AlertLevel, MetricKey, MetricSample, RunningMaxima, Snapshot};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub struct Sources {
    pub cpu: Box<dyn CpuCounter>,
    pub memory: Box<dyn MemoryStatus>,
    pub network: Box<dyn NetworkCounters>,
    pub sensors: Box<dyn SensorTree>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub failed: Vec<MetricKey>,
    pub rescanned: bool,
}

pub struct Aggregator {
    sources: Sources,
    selector: NetworkSelector,
    maxima: RunningMaxima,
    alerts: AlertsConfig,
    vram_suspect_mb: f64,
    ticks: u64,
}

impl Aggregator {
    pub fn new(sources: Sources, cfg: &Config) -> Self {
        Self {
            sources,
            selector: NetworkSelector::new(&cfg.network),
            maxima: RunningMaxima::default(),
            alerts: cfg.alerts,
            vram_suspect_mb: cfg.gpu.vram_suspect_mb,
            ticks: 0,
        }
    }

    pub fn start(&mut self) {
        self.selector.rescan(self.sources.network.as_mut());
    }

    pub fn maxima(&self) -> &RunningMaxima {
        &self.maxima
    }

    pub fn interface(&self) -> Option<&str> {
        self.selector.interface()
    }

    pub fn reset_maxima(&mut self) {
        self.maxima.reset();
    }

    pub fn tick(&mut self) -> (Snapshot, TickReport) {
        self.ticks += 1;
        let mut samples = BTreeMap::new();
        let mut report = TickReport::default();

        match self.sources.cpu.cpu_load_percent() {
            Ok(load) => {
                samples.insert(MetricKey::Cpu, self.threshold_sample(load, load));
            }
            Err(err) => self.absorb(MetricKey::Cpu, &err, &mut report),
        }

        match self.sources.memory.memory_status() {
            Ok(mem) => {
                samples.insert(
                    MetricKey::Ram,
                    self.threshold_sample(mem.used_gb(), mem.load_percent()),
                );
            }
            Err(err) => self.absorb(MetricKey::Ram, &err, &mut report),
        }

        match self.sources.sensors.read_tree() {
            Ok(devices) => {
                let GpuReading {
                    temperature_celsius,
                    vram_used_gb,
                } = gpu::extract(&devices, self.vram_suspect_mb);
                if let Some(t) = temperature_celsius {
                    samples.insert(MetricKey::GpuTemp, self.threshold_sample(t, t));
                }
                if let Some(gb) = vram_used_gb {
                    samples.insert(MetricKey::Vram, plain_sample(gb));
                }
            }
            Err(err) => {
                self.absorb(MetricKey::GpuTemp, &err, &mut report);
                self.absorb(MetricKey::Vram, &err, &mut report);
            }
        }

        let net = self.selector.sample(self.sources.network.as_mut());
        report.rescanned = net.rescanned;
        if net.read_failed {
            report.failed.extend([MetricKey::NetUp, MetricKey::NetDown]);
        } else {
            samples.insert(MetricKey::NetUp, plain_sample(net.throughput.up_bytes_per_sec));
            samples.insert(
                MetricKey::NetDown,
                plain_sample(net.throughput.down_bytes_per_sec),
            );
        }

        for (key, sample) in &samples {
            self.maxima.observe(*key, sample.value);
        }

        let snapshot = Snapshot {
            tick: self.ticks,
            taken_at_unix: now_unix(),
            samples,
            maxima: self.maxima.clone(),
            interface: self.selector.interface().map(str::to_string),
        };
        (snapshot, report)
    }

    fn threshold_sample(&self, value: f64, alert_basis: f64) -> MetricSample {
        MetricSample {
            value,
            alert: Some(AlertLevel::classify(alert_basis, &self.alerts)),
        }
    }

    fn absorb(&self, key: MetricKey, err: &SourceError, report: &mut TickReport) {
        debug!(metric = key.as_str(), error = %err, "source failed, no sample this tick");
        report.failed.push(key);
    }
}

fn plain_sample(value: f64) -> MetricSample {
    MetricSample { value, alert: None }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
