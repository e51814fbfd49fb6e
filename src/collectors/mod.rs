pub mod gpu;
pub mod network;
pub mod sensors;
pub mod system;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to run {command}: {source}")]
    Command {
        command: &'static str,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    CommandStatus {
        command: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("unexpected output from {source_name}: {detail}")]
    Parse {
        source_name: &'static str,
        detail: String,
    },
    #[error("network interface '{0}' is no longer present")]
    InterfaceGone(String),
    #[error("{0} is unavailable")]
    Unavailable(&'static str),
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("hardware sensor subsystem could not be opened: {0}")]
    SensorSubsystem(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryReading {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn used_gb(&self) -> f64 {
        crate::format::bytes_to_gb(self.used_bytes())
    }

    pub fn load_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.used_bytes() as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub up_bytes_per_sec: f64,
    pub down_bytes_per_sec: f64,
}

impl Throughput {
    pub fn total(&self) -> f64 {
        self.up_bytes_per_sec + self.down_bytes_per_sec
    }

    pub fn is_idle(&self) -> bool {
        self.up_bytes_per_sec <= 0.0 && self.down_bytes_per_sec <= 0.0
    }
}

pub trait CpuCounter: Send {
    fn cpu_load_percent(&mut self) -> Result<f64, SourceError>;
}

pub trait MemoryStatus: Send {
    fn memory_status(&mut self) -> Result<MemoryReading, SourceError>;
}

pub trait NetworkCounters: Send {
    fn interfaces(&mut self) -> Result<Vec<String>, SourceError>;

    fn rates(&mut self, iface: &str) -> Result<Throughput, SourceError>;
}

pub trait SensorTree: Send {
    fn read_tree(&mut self) -> Result<Vec<sensors::HardwareDevice>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reading_derivations() {
        let reading = MemoryReading {
            total_bytes: 16 * 1024 * 1024 * 1024,
            available_bytes: 4 * 1024 * 1024 * 1024,
        };
        assert_eq!(reading.used_gb(), 12.0);
        assert_eq!(reading.load_percent(), 75.0);

        let empty = MemoryReading {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.load_percent(), 0.0);
    }

    #[test]
    fn throughput_idle_means_no_traffic_either_way() {
        assert!(Throughput::default().is_idle());
        assert!(!Throughput {
            up_bytes_per_sec: 1.0,
            down_bytes_per_sec: 0.0
        }
        .is_idle());
    }
}
