//! Periodic usage collection.
//!
//! Each cycle runs the full aggregation query set against MongoDB, assembles the
//! results into a [`UsageSnapshot`], and publishes the snapshot to the metric
//! registry in one step. A failed cycle publishes nothing, so the `/metrics`
//! endpoint keeps serving the last successful snapshot until the next tick.

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::CollectorConfig,
    db::{
        ChatDb,
        models::{DailyUniqueUsers, ModelCount, ModelDailyMessages},
    },
    errors::Result,
    metrics::UsageMetrics,
};

/// Point-in-time aggregation results for one collection cycle.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub total_messages: u64,
    pub total_errors: u64,
    pub total_conversations: u64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,

    pub messages_per_model: Vec<ModelCount>,
    pub errors_per_model: Vec<ModelCount>,
    pub input_tokens_per_model: Vec<ModelCount>,
    pub output_tokens_per_model: Vec<ModelCount>,

    pub active_users: u64,
    pub active_conversations: u64,
    pub unique_users_yesterday: u64,

    pub daily_unique_users: Vec<DailyUniqueUsers>,
    pub messages_per_user: Vec<i64>,
    pub model_daily_messages: Vec<ModelDailyMessages>,
}

/// Runs collection cycles on a fixed interval until cancelled.
pub struct Collector {
    db: ChatDb,
    metrics: UsageMetrics,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(db: ChatDb, metrics: UsageMetrics, config: CollectorConfig) -> Self {
        Self { db, metrics, config }
    }

    /// Run one cycle: query everything, then publish atomically. On error the
    /// registry is left untouched.
    pub async fn run_cycle(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let snapshot = self.snapshot().await?;
        self.metrics.publish(&snapshot);
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            messages = snapshot.total_messages,
            "Published usage snapshot"
        );
        Ok(())
    }

    async fn snapshot(&self) -> Result<UsageSnapshot> {
        let now = Utc::now();
        let lookback_start = now - ChronoDuration::days(i64::from(self.config.lookback_days));
        let active_start = now - ChronoDuration::seconds(self.config.active_window.as_secs() as i64);
        let today_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let yesterday_start = today_start - ChronoDuration::days(1);

        Ok(UsageSnapshot {
            total_messages: self.db.total_messages().await?,
            total_errors: self.db.total_errors().await?,
            total_conversations: self.db.total_conversations().await?,
            total_input_tokens: self.db.total_input_tokens().await?,
            total_output_tokens: self.db.total_output_tokens().await?,

            messages_per_model: self.db.messages_per_model().await?,
            errors_per_model: self.db.errors_per_model().await?,
            input_tokens_per_model: self.db.input_tokens_per_model().await?,
            output_tokens_per_model: self.db.output_tokens_per_model().await?,

            active_users: self.db.active_users(active_start).await?,
            active_conversations: self.db.active_conversations(active_start).await?,
            unique_users_yesterday: self.db.unique_users_between(yesterday_start, today_start).await?,

            daily_unique_users: self.db.daily_unique_users(lookback_start).await?,
            messages_per_user: self.db.messages_per_user(lookback_start).await?,
            model_daily_messages: self.db.model_daily_messages(lookback_start).await?,
        })
    }

    /// Collection loop. The first tick fires immediately so metrics are
    /// available shortly after startup; overlapping ticks are skipped rather
    /// than queued.
    pub async fn run_daemon(self, shutdown: CancellationToken) {
        info!("Starting usage collector with {:?} interval", self.config.interval);
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Usage collector shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Collection cycle failed, keeping last published values: {e}");
                    }
                }
            }
        }
    }
}
