use crate::state::MetricKey;

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

pub fn throughput(bytes_per_sec: f64) -> String {
    if bytes_per_sec < KB {
        return format!("{:.1} B/s", bytes_per_sec);
    }
    let kb = bytes_per_sec / KB;
    if bytes_per_sec < MB {
        return format!("{:.1} KB/s", kb);
    }
    format!("{:.1} MB/s", kb / KB)
}

pub fn metric(key: MetricKey, value: f64) -> String {
    match key {
        MetricKey::Cpu => format!("{:.1} %", value),
        MetricKey::GpuTemp => format!("{:.1} °C", value),
        MetricKey::Ram | MetricKey::Vram => format!("{:.1} GB", value),
        MetricKey::NetUp | MetricKey::NetDown => throughput(value),
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64) / 1024.0 / 1024.0 / 1024.0
}
