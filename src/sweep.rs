use std::sync::Arc;

use anyhow::{Error, Result};
use chrono::Utc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tracing::{info, warn};

use crate::{aggregation::WindowManager, pipeline::EventPipeline};

/// Scheduled flush of aggregation windows one generation old. Owns its
/// timer task and stops with the service instead of ticking forever.
pub struct Sweeper {
    windows: Arc<WindowManager>,
    pipeline: Arc<EventPipeline>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(windows: Arc<WindowManager>, pipeline: Arc<EventPipeline>, interval: Duration) -> Self {
        Self {
            windows,
            pipeline,
            interval,
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Window sweeper started");

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Window sweep failed");
                        }
                    }
                }
            }

            info!("Window sweeper stopped");
        })
    }

    pub async fn sweep_once(&self) -> Result<usize, Error> {
        let now_ms = Utc::now().timestamp_millis();
        let flushed = self.windows.sweep(now_ms).await?;
        let count = flushed.len();

        for event in flushed {
            if let Err(e) = self.pipeline.emit(event).await {
                warn!(error = %e, "Failed to emit swept aggregate");
            }
        }

        if count > 0 {
            info!(count, "Swept expired aggregation windows");
        }

        Ok(count)
    }
}
