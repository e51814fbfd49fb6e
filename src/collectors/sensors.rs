use crate::collectors::{InitError, SensorTree, SourceError};
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use sysinfo::{ComponentExt, System, SystemExt};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Cpu,
    GpuNvidia,
    GpuAmd,
    GpuIntel,
    Memory,
    Motherboard,
    Storage,
    Network,
    Other,
}

impl HardwareKind {
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            HardwareKind::GpuNvidia | HardwareKind::GpuAmd | HardwareKind::GpuIntel
        )
    }

    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        if s.contains("gpu") {
            if s.contains("nvidia") {
                HardwareKind::GpuNvidia
            } else if s.contains("amd") || s.contains("radeon") {
                HardwareKind::GpuAmd
            } else {
                HardwareKind::GpuIntel
            }
        } else if s.contains("cpu") {
            HardwareKind::Cpu
        } else if s.contains("memory") || s.starts_with("/ram") {
            HardwareKind::Memory
        } else if s.contains("motherboard") || s.contains("mainboard") || s.starts_with("/lpc") {
            HardwareKind::Motherboard
        } else if s.contains("storage") || s.starts_with("/hdd") || s.starts_with("/nvme") {
            HardwareKind::Storage
        } else if s.contains("network") || s.starts_with("/nic") {
            HardwareKind::Network
        } else {
            HardwareKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature,
    Load,
    SmallData,
    Data,
    Clock,
    Other,
}

impl SensorKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "temperature" => SensorKind::Temperature,
            "load" => SensorKind::Load,
            "smalldata" => SensorKind::SmallData,
            "data" => SensorKind::Data,
            "clock" => SensorKind::Clock,
            _ => SensorKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub kind: SensorKind,
    pub name: String,
    pub value: Option<f64>,
}

impl Sensor {
    pub fn new(kind: SensorKind, name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            kind,
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareDevice {
    pub identifier: String,
    pub name: String,
    pub kind: HardwareKind,
    pub sensors: Vec<Sensor>,
}

enum Backend {
    LibreHardwareMonitor,
    NvidiaSmi,
    Components(Box<System>),
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::LibreHardwareMonitor => "librehardwaremonitor",
            Backend::NvidiaSmi => "nvidia-smi",
            Backend::Components(_) => "sysinfo-components",
        }
    }

    fn spawns_process(&self) -> bool {
        !matches!(self, Backend::Components(_))
    }

    fn read(&mut self) -> Result<Vec<HardwareDevice>, SourceError> {
        match self {
            Backend::LibreHardwareMonitor => read_lhm(),
            Backend::NvidiaSmi => read_nvidia_smi(),
            Backend::Components(system) => {
                system.refresh_components();
                if system.components().is_empty() {
                    return Err(SourceError::Unavailable("hwmon components"));
                }
                Ok(devices_from_readings(
                    system
                        .components()
                        .iter()
                        .map(|c| (c.label(), c.temperature())),
                ))
            }
        }
    }
}

struct Cadence {
    period: Duration,
    last: Option<(Instant, Vec<HardwareDevice>)>,
}

impl Cadence {
    fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    // A failed fetch drops the cached tree so the next call retries.
    fn read(
        &mut self,
        now: Instant,
        fetch: impl FnOnce() -> Result<Vec<HardwareDevice>, SourceError>,
    ) -> Result<Vec<HardwareDevice>, SourceError> {
        if let Some((at, devices)) = &self.last {
            if now.saturating_duration_since(*at) < self.period {
                return Ok(devices.clone());
            }
        }
        match fetch() {
            Ok(devices) => {
                self.last = Some((now, devices.clone()));
                Ok(devices)
            }
            Err(err) => {
                self.last = None;
                Err(err)
            }
        }
    }
}

struct Polled {
    backend: Backend,
    cadence: Cadence,
}

pub struct HostSensorTree {
    backends: Vec<Polled>,
}

impl HostSensorTree {
    pub fn open(external_refresh: Duration) -> Result<Self, InitError> {
        let mut candidates = vec![Backend::Components(Box::new(components_system()))];
        candidates.push(Backend::NvidiaSmi);
        if cfg!(target_os = "windows") {
            candidates.push(Backend::LibreHardwareMonitor);
        }

        let mut backends = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for mut backend in candidates {
            let period = if backend.spawns_process() {
                external_refresh
            } else {
                Duration::ZERO
            };
            let mut cadence = Cadence::new(period);
            match cadence.read(Instant::now(), || backend.read()) {
                Ok(devices) => {
                    info!(
                        backend = backend.name(),
                        devices = devices.len(),
                        refresh_secs = period.as_secs(),
                        "sensor backend available"
                    );
                    backends.push(Polled { backend, cadence });
                }
                Err(err) => {
                    debug!(backend = backend.name(), error = %err, "sensor backend skipped");
                    failures.push(format!("{}: {err}", backend.name()));
                }
            }
        }

        if backends.is_empty() {
            return Err(InitError::SensorSubsystem(failures.join("; ")));
        }
        Ok(Self { backends })
    }
}

impl SensorTree for HostSensorTree {
    fn read_tree(&mut self) -> Result<Vec<HardwareDevice>, SourceError> {
        let now = Instant::now();
        let mut devices = Vec::new();
        let mut last_err = None;
        let mut answered = false;
        for Polled { backend, cadence } in &mut self.backends {
            match cadence.read(now, || backend.read()) {
                Ok(found) => {
                    answered = true;
                    devices.extend(found);
                }
                Err(err) => {
                    debug!(backend = backend.name(), error = %err, "sensor backend read failed");
                    last_err = Some(err);
                }
            }
        }
        match (answered, last_err) {
            (false, Some(err)) => Err(err),
            _ => Ok(devices),
        }
    }
}

fn components_system() -> System {
    let mut system = System::new();
    system.refresh_components_list();
    system
}

// hwmon labels ("amdgpu edge", "nouveau temp1") are mapped onto the sensor
// names the GPU extractor looks for.
fn devices_from_readings<'a>(
    readings: impl IntoIterator<Item = (&'a str, f32)>,
) -> Vec<HardwareDevice> {
    let mut out: Vec<HardwareDevice> = Vec::new();
    for (label, temperature) in readings {
        let lower = label.to_lowercase();
        let kind = if lower.contains("nvidia") {
            HardwareKind::GpuNvidia
        } else if lower.contains("amdgpu") || lower.contains("radeon") {
            HardwareKind::GpuAmd
        } else if lower.contains("gpu") || lower.contains("nouveau") || lower.contains("i915") {
            HardwareKind::GpuIntel
        } else {
            continue;
        };

        let chip = lower.split_whitespace().next().unwrap_or("gpu").to_string();
        let identifier = format!("/hwmon/{chip}");
        let sensor = Sensor::new(
            SensorKind::Temperature,
            gpu_sensor_name(&lower),
            Some(temperature as f64),
        );
        match out.iter_mut().find(|d| d.identifier == identifier) {
            Some(device) => device.sensors.push(sensor),
            None => out.push(HardwareDevice {
                identifier,
                name: chip,
                kind,
                sensors: vec![sensor],
            }),
        }
    }
    out
}

fn gpu_sensor_name(lower_label: &str) -> &'static str {
    if lower_label.contains("junction") || lower_label.contains("hotspot") {
        "GPU Hot Spot"
    } else if lower_label.contains("mem") {
        "GPU Memory Junction"
    } else {
        "GPU Core"
    }
}

const LHM_SCRIPT: &str = "$n=@('root/LibreHardwareMonitor','root/OpenHardwareMonitor'); foreach($ns in $n){ try { $h=Get-CimInstance -Namespace $ns -ClassName Hardware -ErrorAction Stop; $s=Get-CimInstance -Namespace $ns -ClassName Sensor -ErrorAction Stop } catch { continue }; if($h){ $h | ForEach-Object { \"H|$($_.Identifier)|$($_.Name)|$($_.HardwareType)\" } }; if($s){ $s | ForEach-Object { \"S|$($_.Parent)|$($_.SensorType)|$($_.Name)|$($_.Value)\" }; break } }";

fn read_lhm() -> Result<Vec<HardwareDevice>, SourceError> {
    let output = run_powershell(LHM_SCRIPT)?;
    if !output.status.success() {
        return Err(SourceError::CommandStatus {
            command: "powershell",
            status: output.status,
        });
    }
    Ok(parse_lhm_output(&decode_cmd_stdout(&output.stdout)))
}

pub fn parse_lhm_output(text: &str) -> Vec<HardwareDevice> {
    let mut devices: Vec<HardwareDevice> = Vec::new();

    for line in text.lines() {
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        match parts.as_slice() {
            ["H", identifier, name, hardware_type, ..] => {
                let kind = match HardwareKind::parse(hardware_type) {
                    HardwareKind::Other => HardwareKind::parse(identifier),
                    kind => kind,
                };
                match devices.iter_mut().find(|d| d.identifier == *identifier) {
                    Some(device) => {
                        device.name = name.to_string();
                        device.kind = kind;
                    }
                    None => devices.push(HardwareDevice {
                        identifier: identifier.to_string(),
                        name: name.to_string(),
                        kind,
                        sensors: Vec::new(),
                    }),
                }
            }
            ["S", parent, sensor_type, name, value, ..] => {
                if parent.is_empty() {
                    continue;
                }
                let sensor = Sensor::new(SensorKind::parse(sensor_type), *name, parse_f64_loose(value));
                match devices.iter_mut().find(|d| d.identifier == *parent) {
                    Some(device) => device.sensors.push(sensor),
                    None => devices.push(HardwareDevice {
                        identifier: parent.to_string(),
                        name: parent.to_string(),
                        kind: HardwareKind::parse(parent),
                        sensors: vec![sensor],
                    }),
                }
            }
            _ => {}
        }
    }

    devices
}

fn read_nvidia_smi() -> Result<Vec<HardwareDevice>, SourceError> {
    let output = run_nvidia_smi(&[
        "--query-gpu=index,name,temperature.gpu,memory.used,memory.total",
        "--format=csv,noheader,nounits",
    ])?;
    if !output.status.success() {
        return Err(SourceError::CommandStatus {
            command: "nvidia-smi",
            status: output.status,
        });
    }
    let text = String::from_utf8(output.stdout).map_err(|err| SourceError::Parse {
        source_name: "nvidia-smi",
        detail: err.to_string(),
    })?;
    Ok(parse_nvidia_smi_output(&text))
}

pub fn parse_nvidia_smi_output(text: &str) -> Vec<HardwareDevice> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
            if parts.len() < 5 {
                return None;
            }

            Some(HardwareDevice {
                identifier: format!("/nvidia-smi/{}", parts[0]),
                name: parts[1].to_string(),
                kind: HardwareKind::GpuNvidia,
                sensors: vec![
                    Sensor::new(SensorKind::Temperature, "GPU Core", parse_f64_loose(parts[2])),
                    Sensor::new(
                        SensorKind::SmallData,
                        "GPU Memory Used",
                        parse_f64_loose(parts[3]),
                    ),
                    Sensor::new(
                        SensorKind::SmallData,
                        "GPU Memory Total",
                        parse_f64_loose(parts[4]),
                    ),
                ],
            })
        })
        .collect()
}

fn run_nvidia_smi(args: &[&str]) -> Result<Output, SourceError> {
    match Command::new("nvidia-smi").args(args).output() {
        Ok(output) => Ok(output),
        #[cfg(target_os = "windows")]
        Err(_) => Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
            .map_err(|source| SourceError::Command {
                command: "nvidia-smi",
                source,
            }),
        #[cfg(not(target_os = "windows"))]
        Err(source) => Err(SourceError::Command {
            command: "nvidia-smi",
            source,
        }),
    }
}

#[cfg(target_os = "windows")]
fn run_powershell(script: &str) -> Result<Output, SourceError> {
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); chcp 65001 > $null; {script}"
    );
    if let Ok(output) = Command::new("powershell")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
    {
        return Ok(output);
    }

    Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
        .map_err(|source| SourceError::Command {
            command: "powershell",
            source,
        })
}

#[cfg(not(target_os = "windows"))]
fn run_powershell(_script: &str) -> Result<Output, SourceError> {
    Err(SourceError::Unavailable("powershell"))
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | 'e' | 'E' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}
