use crate::collectors::{NetworkCounters, Throughput};
use crate::config::NetworkConfig;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const LOOPBACK_NAMES: [&str; 2] = ["lo", "lo0"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Unselected,
    Selected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkSample {
    pub throughput: Throughput,
    pub rescanned: bool,
    pub read_failed: bool,
}

pub struct NetworkSelector {
    selection: Selection,
    idle_ticks: u32,
    idle_ticks_before_rescan: u32,
    probe_delay: Duration,
    denylist: Vec<String>,
}

impl NetworkSelector {
    pub fn new(cfg: &NetworkConfig) -> Self {
        Self {
            selection: Selection::Unselected,
            idle_ticks: 0,
            idle_ticks_before_rescan: cfg.idle_ticks_before_rescan,
            probe_delay: cfg.probe_delay(),
            denylist: cfg.denylist.clone(),
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn interface(&self) -> Option<&str> {
        match &self.selection {
            Selection::Selected(name) => Some(name),
            Selection::Unselected => None,
        }
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn is_denied(&self, iface: &str) -> bool {
        LOOPBACK_NAMES.contains(&iface) || self.denylist.iter().any(|m| iface.contains(m.as_str()))
    }

    pub fn rescan(&mut self, counters: &mut dyn NetworkCounters) {
        self.idle_ticks = 0;

        let interfaces = match counters.interfaces() {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "interface enumeration failed");
                self.selection = Selection::Unselected;
                return;
            }
        };

        let mut best: Option<(String, f64)> = None;
        for iface in interfaces.into_iter().filter(|i| !self.is_denied(i)) {
            let measured = counters.rates(&iface).and_then(|_| {
                if !self.probe_delay.is_zero() {
                    thread::sleep(self.probe_delay);
                }
                counters.rates(&iface)
            });
            let total = match measured {
                Ok(rates) => rates.total(),
                Err(err) => {
                    debug!(iface = %iface, error = %err, "interface probe failed");
                    continue;
                }
            };
            if best.as_ref().map_or(true, |(_, max)| total > *max) {
                best = Some((iface, total));
            }
        }

        let next = match best {
            Some((iface, _)) => Selection::Selected(iface),
            None => Selection::Unselected,
        };
        match (&self.selection, &next) {
            (prev, Selection::Selected(iface)) if prev != &next => {
                info!(iface = %iface, "network interface selected");
            }
            (Selection::Selected(prev), Selection::Unselected) => {
                info!(previous = %prev, "no viable network interface");
            }
            (Selection::Unselected, Selection::Unselected) => {
                debug!("no viable network interface");
            }
            _ => {}
        }
        self.selection = next;
    }

    pub fn sample(&mut self, counters: &mut dyn NetworkCounters) -> NetworkSample {
        let read = match &self.selection {
            Selection::Selected(iface) => Some(counters.rates(iface)),
            Selection::Unselected => None,
        };

        let throughput = match read {
            Some(Err(err)) => {
                debug!(error = %err, "selected interface read failed");
                self.rescan(counters);
                return NetworkSample {
                    throughput: Throughput::default(),
                    rescanned: true,
                    read_failed: true,
                };
            }
            Some(Ok(rates)) => rates,
            None => Throughput::default(),
        };

        if throughput.is_idle() {
            self.idle_ticks += 1;
        } else {
            self.idle_ticks = 0;
        }

        let rescanned = self.idle_ticks >= self.idle_ticks_before_rescan;
        if rescanned {
            debug!(ticks = self.idle_ticks, "no traffic, rescanning interfaces");
            self.rescan(counters);
        }

        NetworkSample {
            throughput,
            rescanned,
            read_failed: false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collectors::SourceError;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    pub(crate) struct FakeCounters {
        pub order: Vec<String>,
        pub readings: HashMap<String, VecDeque<Result<Throughput, ()>>>,
        pub last: HashMap<String, Throughput>,
        pub enumerate_fails: bool,
        pub enumerations: u32,
    }

    impl FakeCounters {
        pub fn with(ifaces: &[(&str, f64)]) -> Self {
            let mut fake = Self::default();
            for (name, total) in ifaces {
                fake.order.push(name.to_string());
                fake.last.insert(name.to_string(), down(*total));
            }
            fake
        }

        pub fn queue(&mut self, iface: &str, reading: Result<Throughput, ()>) {
            self.readings.entry(iface.to_string()).or_default().push_back(reading);
        }

        pub fn set(&mut self, iface: &str, reading: Throughput) {
            self.readings.remove(iface);
            self.last.insert(iface.to_string(), reading);
        }
    }

    pub(crate) fn down(bytes: f64) -> Throughput {
        Throughput {
            up_bytes_per_sec: 0.0,
            down_bytes_per_sec: bytes,
        }
    }

    impl NetworkCounters for FakeCounters {
        fn interfaces(&mut self) -> Result<Vec<String>, SourceError> {
            self.enumerations += 1;
            if self.enumerate_fails {
                return Err(SourceError::Unavailable("network enumeration"));
            }
            Ok(self.order.clone())
        }

        fn rates(&mut self, iface: &str) -> Result<Throughput, SourceError> {
            if let Some(next) = self.readings.get_mut(iface).and_then(|q| q.pop_front()) {
                return match next {
                    Ok(t) => {
                        self.last.insert(iface.to_string(), t);
                        Ok(t)
                    }
                    Err(()) => Err(SourceError::InterfaceGone(iface.to_string())),
                };
            }
            self.last
                .get(iface)
                .copied()
                .ok_or_else(|| SourceError::InterfaceGone(iface.to_string()))
        }
    }

    pub(crate) fn test_config() -> NetworkConfig {
        NetworkConfig {
            probe_delay_ms: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn busiest_allowed_interface_is_selected() {
        let mut counters = FakeCounters::with(&[
            ("Ethernet", 1_000.0),
            ("Wi-Fi", 50_000.0),
            ("Loopback Pseudo-Interface 1", 900_000.0),
            ("VMware Network Adapter VMnet8", 800_000.0),
        ]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("Wi-Fi"));
    }

    #[test]
    fn denylisted_names_never_win() {
        let mut counters = FakeCounters::with(&[
            ("lo", 10_000_000.0),
            ("docker0", 9_000_000.0),
            ("Teredo Tunneling", 8_000_000.0),
        ]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.selection(), &Selection::Unselected);
    }

    #[test]
    fn priming_read_is_discarded() {
        let mut counters = FakeCounters::with(&[("eth0", 0.0), ("wlan0", 0.0)]);
        counters.queue("eth0", Ok(down(1_000_000.0)));
        counters.queue("eth0", Ok(down(10.0)));
        counters.queue("wlan0", Ok(down(0.0)));
        counters.queue("wlan0", Ok(down(500.0)));
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("wlan0"));
    }

    #[test]
    fn ties_keep_first_enumerated() {
        let mut counters = FakeCounters::with(&[("eth0", 0.0), ("eth1", 0.0)]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("eth0"));
    }

    #[test]
    fn failed_probe_skips_candidate() {
        let mut counters = FakeCounters::with(&[("eth0", 900.0), ("eth1", 100.0)]);
        counters.queue("eth0", Err(()));
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("eth1"));
    }

    #[test]
    fn enumeration_failure_leaves_unselected_and_reads_zero() {
        let mut counters = FakeCounters::with(&[("eth0", 100.0)]);
        counters.enumerate_fails = true;
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.selection(), &Selection::Unselected);

        let sample = selector.sample(&mut counters);
        assert_eq!(sample.throughput, Throughput::default());
        assert!(!sample.rescanned);
    }

    #[test]
    fn five_quiet_ticks_trigger_exactly_one_rescan() {
        let mut counters = FakeCounters::with(&[("eth0", 0.0)]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(counters.enumerations, 1);

        for tick in 1..=4 {
            let sample = selector.sample(&mut counters);
            assert!(!sample.rescanned, "rescan too early at tick {tick}");
            assert_eq!(selector.idle_ticks(), tick);
        }
        let sample = selector.sample(&mut counters);
        assert!(sample.rescanned);
        assert_eq!(selector.idle_ticks(), 0);
        assert_eq!(counters.enumerations, 2);

        let sample = selector.sample(&mut counters);
        assert!(!sample.rescanned);
        assert_eq!(selector.idle_ticks(), 1);
        assert_eq!(counters.enumerations, 2);
    }

    #[test]
    fn any_traffic_resets_the_quiet_counter() {
        let mut counters = FakeCounters::with(&[("eth0", 0.0)]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);

        for _ in 0..4 {
            selector.sample(&mut counters);
        }
        counters.set(
            "eth0",
            Throughput {
                up_bytes_per_sec: 1.0,
                down_bytes_per_sec: 0.0,
            },
        );
        let sample = selector.sample(&mut counters);
        assert!(!sample.rescanned);
        assert_eq!(selector.idle_ticks(), 0);
    }

    #[test]
    fn unselected_retries_after_quiet_threshold() {
        let mut counters = FakeCounters::with(&[("eth0", 100.0)]);
        counters.enumerate_fails = true;
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);

        counters.enumerate_fails = false;
        for _ in 0..4 {
            assert!(!selector.sample(&mut counters).rescanned);
        }
        assert!(selector.sample(&mut counters).rescanned);
        assert_eq!(selector.interface(), Some("eth0"));
    }

    #[test]
    fn vanished_interface_forces_rescan() {
        let mut counters = FakeCounters::with(&[("eth0", 100.0), ("wlan0", 50.0)]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("eth0"));

        counters.order.retain(|i| i != "eth0");
        counters.last.remove("eth0");
        let sample = selector.sample(&mut counters);
        assert!(sample.read_failed);
        assert!(sample.rescanned);
        assert_eq!(sample.throughput, Throughput::default());
        assert_eq!(selector.interface(), Some("wlan0"));
    }

    #[test]
    fn previous_selection_does_not_bias_rescan() {
        let mut counters = FakeCounters::with(&[("eth0", 100.0), ("wlan0", 100.0)]);
        let mut selector = NetworkSelector::new(&test_config());
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("eth0"));

        counters.set("wlan0", down(200.0));
        selector.rescan(&mut counters);
        assert_eq!(selector.interface(), Some("wlan0"));
    }
}
