use crate::aggregator::{now_unix, TickReport};
use crate::state::{MetricKey, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub vitals_metric_value: GaugeVec,
    pub vitals_metric_max: GaugeVec,
    pub vitals_metric_alert_level: GaugeVec,
    pub vitals_source_failures_total: CounterVec,
    pub vitals_interface_rescans_total: Counter,
    pub vitals_selected_interface: GaugeVec,
    pub vitals_ticks_total: Counter,
    pub vitals_last_tick_timestamp_seconds: Gauge,
    pub vitals_scrape_count_total: Counter,
    pub vitals_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let vitals_metric_value = GaugeVec::new(
            opts!(
                "vitals_metric_value",
                "Latest sample per metric (percent, celsius, GB or bytes/s)"
            ),
            &["metric"],
        )?;
        let vitals_metric_max = GaugeVec::new(
            opts!(
                "vitals_metric_max",
                "Running maximum per metric since start or last reset"
            ),
            &["metric"],
        )?;
        let vitals_metric_alert_level = GaugeVec::new(
            opts!(
                "vitals_metric_alert_level",
                "Alert level of the latest sample (0 normal, 1 warn, 2 critical)"
            ),
            &["metric"],
        )?;
        let vitals_source_failures_total = CounterVec::new(
            opts!(
                "vitals_source_failures_total",
                "Ticks on which a metric's source produced no sample"
            ),
            &["metric"],
        )?;
        let vitals_interface_rescans_total = Counter::with_opts(opts!(
            "vitals_interface_rescans_total",
            "Network interface rescans triggered by idle traffic or read failures"
        ))?;
        let vitals_selected_interface = GaugeVec::new(
            opts!(
                "vitals_selected_interface",
                "1 for the network interface currently sampled"
            ),
            &["iface"],
        )?;
        let vitals_ticks_total =
            Counter::with_opts(opts!("vitals_ticks_total", "Completed sampling ticks"))?;
        let vitals_last_tick_timestamp_seconds = Gauge::with_opts(opts!(
            "vitals_last_tick_timestamp_seconds",
            "Unix time of the last completed tick"
        ))?;
        let vitals_scrape_count_total = Counter::with_opts(opts!(
            "vitals_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let vitals_uptime_seconds =
            Gauge::with_opts(opts!("vitals_uptime_seconds", "Engine uptime in seconds"))?;

        register(&registry, &vitals_metric_value)?;
        register(&registry, &vitals_metric_max)?;
        register(&registry, &vitals_metric_alert_level)?;
        register(&registry, &vitals_source_failures_total)?;
        register(&registry, &vitals_interface_rescans_total)?;
        register(&registry, &vitals_selected_interface)?;
        register(&registry, &vitals_ticks_total)?;
        register(&registry, &vitals_last_tick_timestamp_seconds)?;
        register(&registry, &vitals_scrape_count_total)?;
        register(&registry, &vitals_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            vitals_metric_value,
            vitals_metric_max,
            vitals_metric_alert_level,
            vitals_source_failures_total,
            vitals_interface_rescans_total,
            vitals_selected_interface,
            vitals_ticks_total,
            vitals_last_tick_timestamp_seconds,
            vitals_scrape_count_total,
            vitals_uptime_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot, report: &TickReport) {
        self.vitals_ticks_total.inc();
        self.vitals_last_tick_timestamp_seconds
            .set(snapshot.taken_at_unix as f64);

        // Absent samples keep their last exported value, like the widget does.
        for key in MetricKey::ALL {
            let label = [key.as_str()];
            self.vitals_metric_max
                .with_label_values(&label)
                .set(snapshot.maxima.get(key));
            if let Some(sample) = snapshot.sample(key) {
                self.vitals_metric_value
                    .with_label_values(&label)
                    .set(sample.value);
                if let Some(level) = sample.alert {
                    self.vitals_metric_alert_level
                        .with_label_values(&label)
                        .set(level.as_gauge());
                }
            }
        }

        for key in &report.failed {
            self.vitals_source_failures_total
                .with_label_values(&[key.as_str()])
                .inc();
        }
        if report.rescanned {
            self.vitals_interface_rescans_total.inc();
        }

        self.vitals_selected_interface.reset();
        if let Some(iface) = &snapshot.interface {
            self.vitals_selected_interface
                .with_label_values(&[iface])
                .set(1.0);
        }

        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.vitals_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.vitals_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
