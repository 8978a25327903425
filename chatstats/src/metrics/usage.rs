//! Usage gauges published from collection snapshots.
//!
//! Everything here is a gauge, not a counter: each cycle re-reads absolute
//! values from the database and overwrites the previous ones, so the exporter
//! itself carries no state between cycles. Labeled families are reset before
//! each publish so that models or days that dropped out of the lookback window
//! disappear from the exposition instead of going stale.

use std::collections::BTreeMap;

use prometheus::{Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::{collector::UsageSnapshot, db::models::ModelCount, stats::Distribution};

/// Usage gauge instruments using Prometheus
#[derive(Clone)]
pub struct UsageMetrics {
    messages_total: IntGauge,
    errors_total: IntGauge,
    conversations_total: IntGauge,
    input_tokens_total: IntGauge,
    output_tokens_total: IntGauge,

    messages_per_model: IntGaugeVec,
    errors_per_model: IntGaugeVec,
    input_tokens_per_model: IntGaugeVec,
    output_tokens_per_model: IntGaugeVec,

    active_users: IntGauge,
    active_conversations: IntGauge,
    unique_users_yesterday: IntGauge,

    daily_unique_users: IntGaugeVec,
    daily_unique_users_mean: Gauge,
    daily_unique_users_stddev: Gauge,

    messages_per_user_mean: Gauge,
    messages_per_user_stddev: Gauge,

    model_daily_messages: IntGaugeVec,
    model_daily_messages_mean: GaugeVec,
    model_daily_messages_stddev: GaugeVec,

    /// Reference to the Prometheus registry
    registry: Registry,
}

impl UsageMetrics {
    /// Create the usage gauge instruments and register them with Prometheus
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_total = IntGauge::new("chat_messages_total", "Total number of messages")?;
        registry.register(Box::new(messages_total.clone()))?;

        let errors_total = IntGauge::new("chat_errors_total", "Total number of messages flagged as errors")?;
        registry.register(Box::new(errors_total.clone()))?;

        let conversations_total = IntGauge::new("chat_conversations_total", "Total number of conversations")?;
        registry.register(Box::new(conversations_total.clone()))?;

        let input_tokens_total = IntGauge::new("chat_input_tokens_total", "Total tokens across user-sent messages")?;
        registry.register(Box::new(input_tokens_total.clone()))?;

        let output_tokens_total = IntGauge::new("chat_output_tokens_total", "Total tokens across model responses")?;
        registry.register(Box::new(output_tokens_total.clone()))?;

        let messages_per_model = IntGaugeVec::new(
            Opts::new("chat_messages_per_model_total", "Model response count per model"),
            &["model"],
        )?;
        registry.register(Box::new(messages_per_model.clone()))?;

        let errors_per_model = IntGaugeVec::new(
            Opts::new("chat_errors_per_model_total", "Error message count per model"),
            &["model"],
        )?;
        registry.register(Box::new(errors_per_model.clone()))?;

        let input_tokens_per_model = IntGaugeVec::new(
            Opts::new("chat_input_tokens_per_model_total", "Input token count per model"),
            &["model"],
        )?;
        registry.register(Box::new(input_tokens_per_model.clone()))?;

        let output_tokens_per_model = IntGaugeVec::new(
            Opts::new("chat_output_tokens_per_model_total", "Output token count per model"),
            &["model"],
        )?;
        registry.register(Box::new(output_tokens_per_model.clone()))?;

        let active_users = IntGauge::new("chat_active_users", "Users with a message inside the activity window")?;
        registry.register(Box::new(active_users.clone()))?;

        let active_conversations = IntGauge::new(
            "chat_active_conversations",
            "Conversations with a message inside the activity window",
        )?;
        registry.register(Box::new(active_conversations.clone()))?;

        let unique_users_yesterday = IntGauge::new(
            "chat_unique_users_yesterday",
            "Distinct users with at least one message during the previous UTC day",
        )?;
        registry.register(Box::new(unique_users_yesterday.clone()))?;

        let daily_unique_users = IntGaugeVec::new(
            Opts::new("chat_daily_unique_users", "Distinct users per UTC day inside the lookback window"),
            &["day"],
        )?;
        registry.register(Box::new(daily_unique_users.clone()))?;

        let daily_unique_users_mean = Gauge::new(
            "chat_daily_unique_users_mean",
            "Mean of the daily unique-user counts inside the lookback window",
        )?;
        registry.register(Box::new(daily_unique_users_mean.clone()))?;

        let daily_unique_users_stddev = Gauge::new(
            "chat_daily_unique_users_stddev",
            "Population standard deviation of the daily unique-user counts",
        )?;
        registry.register(Box::new(daily_unique_users_stddev.clone()))?;

        let messages_per_user_mean = Gauge::new(
            "chat_messages_per_user_mean",
            "Mean message count per user inside the lookback window",
        )?;
        registry.register(Box::new(messages_per_user_mean.clone()))?;

        let messages_per_user_stddev = Gauge::new(
            "chat_messages_per_user_stddev",
            "Population standard deviation of per-user message counts",
        )?;
        registry.register(Box::new(messages_per_user_stddev.clone()))?;

        let model_daily_messages = IntGaugeVec::new(
            Opts::new("chat_model_daily_messages", "Model response count per model per UTC day"),
            &["model", "day"],
        )?;
        registry.register(Box::new(model_daily_messages.clone()))?;

        let model_daily_messages_mean = GaugeVec::new(
            Opts::new("chat_model_daily_messages_mean", "Mean daily response count per model"),
            &["model"],
        )?;
        registry.register(Box::new(model_daily_messages_mean.clone()))?;

        let model_daily_messages_stddev = GaugeVec::new(
            Opts::new(
                "chat_model_daily_messages_stddev",
                "Population standard deviation of daily response counts per model",
            ),
            &["model"],
        )?;
        registry.register(Box::new(model_daily_messages_stddev.clone()))?;

        Ok(Self {
            messages_total,
            errors_total,
            conversations_total,
            input_tokens_total,
            output_tokens_total,
            messages_per_model,
            errors_per_model,
            input_tokens_per_model,
            output_tokens_per_model,
            active_users,
            active_conversations,
            unique_users_yesterday,
            daily_unique_users,
            daily_unique_users_mean,
            daily_unique_users_stddev,
            messages_per_user_mean,
            messages_per_user_stddev,
            model_daily_messages,
            model_daily_messages_mean,
            model_daily_messages_stddev,
            registry: registry.clone(),
        })
    }

    /// Get reference to the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Overwrite every gauge from a snapshot. Labeled families are reset first
    /// so label sets absent from this snapshot stop being exported.
    pub fn publish(&self, snapshot: &UsageSnapshot) {
        self.messages_total.set(snapshot.total_messages as i64);
        self.errors_total.set(snapshot.total_errors as i64);
        self.conversations_total.set(snapshot.total_conversations as i64);
        self.input_tokens_total.set(snapshot.total_input_tokens);
        self.output_tokens_total.set(snapshot.total_output_tokens);

        set_per_model(&self.messages_per_model, &snapshot.messages_per_model);
        set_per_model(&self.errors_per_model, &snapshot.errors_per_model);
        set_per_model(&self.input_tokens_per_model, &snapshot.input_tokens_per_model);
        set_per_model(&self.output_tokens_per_model, &snapshot.output_tokens_per_model);

        self.active_users.set(snapshot.active_users as i64);
        self.active_conversations.set(snapshot.active_conversations as i64);
        self.unique_users_yesterday.set(snapshot.unique_users_yesterday as i64);

        self.daily_unique_users.reset();
        for row in &snapshot.daily_unique_users {
            self.daily_unique_users.with_label_values(&[&row.day]).set(row.count);
        }
        let daily_counts: Vec<i64> = snapshot.daily_unique_users.iter().map(|r| r.count).collect();
        let daily_dist = Distribution::from_counts(&daily_counts).unwrap_or_default();
        self.daily_unique_users_mean.set(daily_dist.mean);
        self.daily_unique_users_stddev.set(daily_dist.std_dev);

        let user_dist = Distribution::from_counts(&snapshot.messages_per_user).unwrap_or_default();
        self.messages_per_user_mean.set(user_dist.mean);
        self.messages_per_user_stddev.set(user_dist.std_dev);

        self.model_daily_messages.reset();
        self.model_daily_messages_mean.reset();
        self.model_daily_messages_stddev.reset();
        let mut counts_by_model: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for row in &snapshot.model_daily_messages {
            self.model_daily_messages
                .with_label_values(&[&row.key.model, &row.key.day])
                .set(row.count);
            counts_by_model.entry(&row.key.model).or_default().push(row.count);
        }
        for (model, counts) in counts_by_model {
            let dist = Distribution::from_counts(&counts).unwrap_or_default();
            self.model_daily_messages_mean.with_label_values(&[model]).set(dist.mean);
            self.model_daily_messages_stddev.with_label_values(&[model]).set(dist.std_dev);
        }
    }
}

fn set_per_model(gauge: &IntGaugeVec, rows: &[ModelCount]) {
    gauge.reset();
    for row in rows {
        gauge.with_label_values(&[&row.model]).set(row.count);
    }
}
