// Periodic retention/GC loop, run server-side on a fixed interval.
//
// Same `tokio::time::interval` shape the ancestor daemon used for its own
// background scheduler: spawn once from the composition root, tick forever,
// log and swallow individual failures rather than letting one bad cycle take
// the process down.

use crate::port::{Maintenance, MaintenanceConfig};
use std::sync::Arc;
use std::time::Duration;

pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    period: Duration,
}

impl MaintenanceScheduler {
    pub fn new(maintenance: Arc<dyn Maintenance>, config: MaintenanceConfig, period: Duration) -> Self {
        Self {
            maintenance,
            config,
            period,
        }
    }

    /// Runs until `shutdown` resolves. Intended to be spawned as its own
    /// task from the server's composition root.
    pub async fn run(self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.maintenance.run_full_maintenance(&self.config, false).await {
                        tracing::warn!(error = %err, "maintenance cycle failed, will retry next tick");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("maintenance scheduler shutting down");
                    return;
                }
            }
        }
    }
}

/// Default period between maintenance cycles.
pub const DEFAULT_MAINTENANCE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMaintenance(AtomicUsize);
    #[async_trait]
    impl Maintenance for CountingMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            Ok(0.0)
        }
        async fn gc_terminal_jobs(&self, _retention_days: i64) -> Result<i64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
        async fn gc_blobs(&self, _retention_days: i64) -> Result<i64> {
            Ok(0)
        }
        async fn gc_legacy_logs(&self, _retention_hours: i64) -> Result<i64> {
            Ok(0)
        }
        async fn db_size_mb(&self) -> Result<f64> {
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn stops_promptly_on_shutdown_signal() {
        let maintenance = Arc::new(CountingMaintenance(AtomicUsize::new(0)));
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            MaintenanceConfig::default(),
            Duration::from_secs(3600),
        );
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should shut down promptly")
            .unwrap();
    }
}
