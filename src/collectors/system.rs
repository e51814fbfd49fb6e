use crate::collectors::{
    CpuCounter, MemoryReading, MemoryStatus, NetworkCounters, SourceError, Throughput,
};
use std::collections::HashMap;
use std::time::Instant;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, System, SystemExt};

pub struct SysinfoCpu {
    system: System,
}

impl SysinfoCpu {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl CpuCounter for SysinfoCpu {
    fn cpu_load_percent(&mut self) -> Result<f64, SourceError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(SourceError::Unavailable("cpu usage counter"));
        }
        let usage = self.system.global_cpu_info().cpu_usage() as f64;
        if !usage.is_finite() {
            return Err(SourceError::Parse {
                source_name: "cpu usage counter",
                detail: format!("non-finite value {usage}"),
            });
        }
        Ok(usage.clamp(0.0, 100.0))
    }
}

pub struct SysinfoMemory {
    system: System,
}

impl SysinfoMemory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MemoryStatus for SysinfoMemory {
    fn memory_status(&mut self) -> Result<MemoryReading, SourceError> {
        self.system.refresh_memory();
        let total_bytes = self.system.total_memory();
        if total_bytes == 0 {
            return Err(SourceError::Unavailable("physical memory status"));
        }
        Ok(MemoryReading {
            total_bytes,
            available_bytes: self.system.available_memory(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterMark {
    rx_bytes_total: u64,
    tx_bytes_total: u64,
    at: Instant,
}

pub struct SysinfoNetwork {
    system: System,
    marks: HashMap<String, CounterMark>,
}

impl SysinfoNetwork {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_networks_list();
        Self {
            system,
            marks: HashMap::new(),
        }
    }
}

impl NetworkCounters for SysinfoNetwork {
    fn interfaces(&mut self) -> Result<Vec<String>, SourceError> {
        self.system.refresh_networks_list();
        let mut names: Vec<String> = self
            .system
            .networks()
            .iter()
            .map(|(iface, _)| iface.to_string())
            .collect();
        names.sort();
        self.marks.retain(|name, _| names.contains(name));
        Ok(names)
    }

    fn rates(&mut self, iface: &str) -> Result<Throughput, SourceError> {
        self.system.refresh_networks();
        let Some((_, data)) = self
            .system
            .networks()
            .iter()
            .find(|(name, _)| name.as_str() == iface)
        else {
            self.marks.remove(iface);
            return Err(SourceError::InterfaceGone(iface.to_string()));
        };

        let now = CounterMark {
            rx_bytes_total: data.total_received(),
            tx_bytes_total: data.total_transmitted(),
            at: Instant::now(),
        };
        let previous = self.marks.insert(iface.to_string(), now);
        Ok(previous.map_or_else(Throughput::default, |prev| rates_between(&prev, &now)))
    }
}

fn rates_between(prev: &CounterMark, now: &CounterMark) -> Throughput {
    let secs = now.at.saturating_duration_since(prev.at).as_secs_f64();
    if secs <= 0.0 {
        return Throughput::default();
    }
    Throughput {
        up_bytes_per_sec: now.tx_bytes_total.saturating_sub(prev.tx_bytes_total) as f64 / secs,
        down_bytes_per_sec: now.rx_bytes_total.saturating_sub(prev.rx_bytes_total) as f64 / secs,
    }
}
