//! Background sweeper that drops merge sessions left idle past their TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info};

use mergeway_web::AppState;

/// Periodically expires idle sessions until told to stop.
pub struct SessionSweeper {
    state: Arc<AppState>,
    period: Duration,
}

impl SessionSweeper {
    pub fn new(state: Arc<AppState>, period: Duration) -> Self {
        Self { state, period }
    }

    /// Sweep period for a given session TTL: a tenth of the TTL, clamped to
    /// between 1s and 60s.
    pub fn period_for_ttl(ttl_secs: u64) -> Duration {
        Duration::from_secs((ttl_secs / 10).clamp(1, 60))
    }

    /// Run until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(period_secs = self.period.as_secs(), "session sweeper started");

        let notified = shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can be stale yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let swept = self.state.sessions.sweep_expired(Utc::now()).await;
                    debug!(swept, "session sweep finished");
                }
                _ = &mut notified => {
                    info!("session sweeper stopping");
                    break;
                }
            }
        }
    }
}
