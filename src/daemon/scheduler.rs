//! Health-Check Scheduler
//!
//! Probes every instance on a fixed period. Each probe runs on its own task so
//! a slow instance never delays the others or the request path.

use crate::cluster::InstancesConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

struct TimerHandle {
    id: u64,
    period: Duration,
    task: JoinHandle<()>,
}

pub struct HealthCheckScheduler {
    instances: Arc<InstancesConfig>,
    timer: Mutex<Option<TimerHandle>>,
    next_timer_id: AtomicU64,
}

impl HealthCheckScheduler {
    pub fn new(instances: Arc<InstancesConfig>) -> Arc<Self> {
        Arc::new(Self {
            instances,
            timer: Mutex::new(None),
            next_timer_id: AtomicU64::new(1),
        })
    }

    /// Probe every instance once, without waiting for the probes
    pub fn health_check(&self) {
        spawn_probes(&self.instances);
    }

    /// Start periodic probing. Replaces any running timer.
    pub fn start(&self, period: Duration) {
        self.install(period);
    }

    /// Change the probe period; the old timer is cancelled before the new one
    /// is installed
    pub fn update_period(&self, period: Duration) {
        self.install(period);
    }

    fn install(&self, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let instances = self.instances.clone();

        // Held across cancel and install so two callers cannot both leave a timer running
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.task.abort();
            debug!("Cancelled health check timer {}", previous.id);
        }

        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                spawn_probes(&instances);
            }
        });
        *timer = Some(TimerHandle { id, period, task });
        info!("Health check timer {} running every {}ms", id, period.as_millis());
    }

    /// Cancel the timer. In-flight probes finish on their own.
    pub fn stop(&self) -> bool {
        match self.timer.lock().take() {
            Some(timer) => {
                timer.task.abort();
                info!("Health check timer {} stopped", timer.id);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.timer.lock().as_ref().map(|timer| timer.period)
    }
}

impl Drop for HealthCheckScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.task.abort();
        }
    }
}

fn spawn_probes(instances: &InstancesConfig) {
    for instance in instances.instances() {
        let delegate = instance.delegate().clone();
        tokio::spawn(async move { delegate.probe().await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn scheduler() -> (Arc<HealthCheckScheduler>, Arc<testing::FakeSessionProvider>) {
        let (instance, sessions) = testing::instance(1, "4.0.0");
        let instances = Arc::new(InstancesConfig::new(vec![instance]).unwrap());
        (HealthCheckScheduler::new(instances), sessions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_probes() {
        let (scheduler, sessions) = scheduler();
        scheduler.start(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(sessions.queries(), 3);
        assert!(scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_exactly_once() {
        let (scheduler, sessions) = scheduler();
        scheduler.start(Duration::from_millis(100));

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sessions.queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_period_replaces_timer() {
        let (scheduler, sessions) = scheduler();
        scheduler.start(Duration::from_millis(100));
        scheduler.update_period(Duration::from_millis(1000));
        assert_eq!(scheduler.period(), Some(Duration::from_millis(1000)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(sessions.queries(), 2);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_health_check_probes_immediately() {
        let (scheduler, sessions) = scheduler();
        scheduler.health_check();
        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.queries() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
