use crate::collectors::sensors::{HardwareDevice, Sensor, SensorKind};

pub const DEFAULT_VRAM_SUSPECT_MB: f64 = 24000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuReading {
    pub temperature_celsius: Option<f64>,
    pub vram_used_gb: Option<f64>,
}

pub fn extract(devices: &[HardwareDevice], vram_suspect_mb: f64) -> GpuReading {
    let mut reading = GpuReading::default();
    for device in devices.iter().filter(|d| d.kind.is_gpu()) {
        if let Some(t) = core_temperature(&device.sensors) {
            reading.temperature_celsius = Some(t);
        }
        if let Some(mb) = dedicated_vram_mb(&device.sensors, vram_suspect_mb) {
            reading.vram_used_gb = Some(mb / 1024.0);
        }
    }
    reading
}

fn core_temperature(sensors: &[Sensor]) -> Option<f64> {
    sensors
        .iter()
        .filter(|s| s.kind == SensorKind::Temperature)
        .filter(|s| s.name.contains("Core"))
        .find_map(|s| s.value.filter(|v| *v > 0.0))
}

fn dedicated_vram_mb(sensors: &[Sensor], vram_suspect_mb: f64) -> Option<f64> {
    for sensor in sensors.iter().filter(|s| is_memory_sensor(s)) {
        if sensor.name.contains("Shared") || sensor.name.contains("Total") {
            continue;
        }
        let value = sensor.value.unwrap_or(0.0);
        // Shared pools sometimes report under a generic name, in MB.
        if !sensor.name.contains("Dedicated") && value > vram_suspect_mb {
            continue;
        }
        if value > 0.0 {
            return Some(value);
        }
    }
    None
}

fn is_memory_sensor(sensor: &Sensor) -> bool {
    if sensor.kind != SensorKind::SmallData {
        return false;
    }
    let name = sensor.name.to_ascii_lowercase();
    name.contains("memory") || name.contains("vram")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::sensors::HardwareKind;

    fn gpu(kind: HardwareKind, sensors: Vec<Sensor>) -> HardwareDevice {
        HardwareDevice {
            identifier: "/gpu/0".to_string(),
            name: "test gpu".to_string(),
            kind,
            sensors,
        }
    }

    fn small(name: &str, value: f64) -> Sensor {
        Sensor::new(SensorKind::SmallData, name, Some(value))
    }

    fn temp(name: &str, value: Option<f64>) -> Sensor {
        Sensor::new(SensorKind::Temperature, name, value)
    }

    #[test]
    fn dedicated_vram_wins_over_total_and_shared() {
        let devices = vec![gpu(
            HardwareKind::GpuNvidia,
            vec![
                small("Total VRAM", 16000.0),
                small("Dedicated VRAM", 8000.0),
                small("Shared VRAM", 24000.0),
            ],
        )];
        let reading = extract(&devices, DEFAULT_VRAM_SUSPECT_MB);
        assert_eq!(reading.vram_used_gb, Some(7.8125));
    }

    #[test]
    fn oversized_generic_memory_sensor_is_skipped() {
        let devices = vec![gpu(
            HardwareKind::GpuAmd,
            vec![
                small("GPU Memory Used", 32000.0),
                small("D3D Dedicated Memory Used", 30000.0),
            ],
        )];
        let reading = extract(&devices, DEFAULT_VRAM_SUSPECT_MB);
        assert_eq!(reading.vram_used_gb, Some(30000.0 / 1024.0));
    }

    #[test]
    fn first_positive_survivor_stops_the_scan() {
        let devices = vec![gpu(
            HardwareKind::GpuNvidia,
            vec![
                small("GPU Memory Used", 0.0),
                small("GPU Memory Used", 2048.0),
                small("D3D Dedicated Memory Used", 4096.0),
            ],
        )];
        let reading = extract(&devices, DEFAULT_VRAM_SUSPECT_MB);
        assert_eq!(reading.vram_used_gb, Some(2.0));
    }

    #[test]
    fn non_memory_small_data_is_ignored() {
        let devices = vec![gpu(
            HardwareKind::GpuNvidia,
            vec![
                small("GPU PCIe Rx", 512.0),
                Sensor::new(SensorKind::Load, "GPU Memory", Some(30.0)),
            ],
        )];
        assert_eq!(extract(&devices, DEFAULT_VRAM_SUSPECT_MB).vram_used_gb, None);
    }

    #[test]
    fn core_temperature_needs_positive_value() {
        let devices = vec![gpu(
            HardwareKind::GpuNvidia,
            vec![
                temp("GPU Hot Spot", Some(80.0)),
                temp("GPU Core", Some(0.0)),
                temp("Core", None),
                temp("GPU Core", Some(55.0)),
            ],
        )];
        let reading = extract(&devices, DEFAULT_VRAM_SUSPECT_MB);
        assert_eq!(reading.temperature_celsius, Some(55.0));
    }

    #[test]
    fn missing_core_sensor_is_no_temperature() {
        let devices = vec![gpu(
            HardwareKind::GpuIntel,
            vec![temp("GPU Hot Spot", Some(70.0))],
        )];
        assert_eq!(extract(&devices, DEFAULT_VRAM_SUSPECT_MB), GpuReading::default());
    }

    #[test]
    fn non_gpu_devices_are_not_scanned() {
        let mut cpu = gpu(
            HardwareKind::Cpu,
            vec![temp("CPU Core", Some(65.0)), small("Memory Used", 4000.0)],
        );
        cpu.identifier = "/amdcpu/0".to_string();
        assert_eq!(extract(&[cpu], DEFAULT_VRAM_SUSPECT_MB), GpuReading::default());
    }

    #[test]
    fn later_gpu_replaces_earlier_reading() {
        let devices = vec![
            gpu(
                HardwareKind::GpuIntel,
                vec![temp("GPU Core", Some(40.0)), small("GPU Memory Used", 512.0)],
            ),
            gpu(HardwareKind::GpuNvidia, vec![temp("GPU Core", Some(62.0))]),
        ];
        let reading = extract(&devices, DEFAULT_VRAM_SUSPECT_MB);
        assert_eq!(reading.temperature_celsius, Some(62.0));
        assert_eq!(reading.vram_used_gb, Some(0.5));
    }
}
