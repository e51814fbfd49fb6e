use crate::aggregator::Aggregator;
use crate::metrics::Metrics;
use crate::state::{State, Visibility};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ResetMaxima,
    PointerEntered,
    PointerLeft,
}

#[derive(Debug, Clone)]
pub struct IdleTimer {
    period: Duration,
    deadline: Option<Instant>,
    visibility: Visibility,
}

impl IdleTimer {
    pub fn armed(period: Duration, now: Instant) -> Self {
        Self {
            period,
            deadline: Some(now + period),
            visibility: Visibility::Active,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pointer_entered(&mut self) {
        self.deadline = None;
        self.visibility = Visibility::Active;
    }

    pub fn pointer_left(&mut self, now: Instant) {
        self.deadline = Some(now + self.period);
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let changed = self.visibility != Visibility::Idle;
                self.visibility = Visibility::Idle;
                changed
            }
            _ => false,
        }
    }
}

pub struct Scheduler {
    pub aggregator: Aggregator,
    pub interval: Duration,
    pub idle_after: Duration,
    pub state: Arc<RwLock<State>>,
    pub metrics: Arc<Metrics>,
}

impl Scheduler {
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut idle = IdleTimer::armed(self.idle_after, Instant::now());
        let mut commands_open = true;

        loop {
            let idle_deadline = idle.deadline();
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping tick loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = sleep_until_opt(idle_deadline), if idle_deadline.is_some() => {
                    if idle.poll(Instant::now()) {
                        debug!("widget idle");
                        self.state.write().await.visibility = idle.visibility();
                    }
                }
                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(Command::ResetMaxima) => {
                            self.reset_maxima().await;
                            ticker.reset();
                        }
                        Some(cmd) => self.apply(cmd, &mut idle).await,
                        None => commands_open = false,
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        let aggregator = &mut self.aggregator;
        let (snapshot, report) = tokio::task::block_in_place(|| aggregator.tick());
        self.metrics.update_from_snapshot(&snapshot, &report);
        self.state.write().await.publish(snapshot);
    }

    // Resampling right away keeps every published max at or above its value.
    async fn reset_maxima(&mut self) {
        self.aggregator.reset_maxima();
        info!("running maxima reset");
        self.tick().await;
    }

    async fn apply(&mut self, cmd: Command, idle: &mut IdleTimer) {
        debug!(command = ?cmd, "command received");
        match cmd {
            Command::ResetMaxima => self.reset_maxima().await,
            Command::PointerEntered => {
                idle.pointer_entered();
                self.state.write().await.visibility = idle.visibility();
            }
            Command::PointerLeft => idle.pointer_left(Instant::now()),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
