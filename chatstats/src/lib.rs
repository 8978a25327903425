//! # chatstats: Prometheus usage exporter for chat deployments
//!
//! Reads message and conversation documents from the chat application's
//! MongoDB, aggregates them on a fixed interval, and serves the results as
//! gauges on a Prometheus scrape endpoint.
//!
//! Architecture:
//! - [`db`] runs the aggregation pipelines against MongoDB
//! - [`collector`] assembles query results into snapshots and publishes them
//! - [`metrics`] owns the gauge instruments and the registry
//! - `/metrics` serves whatever the last successful cycle published; a failed
//!   cycle leaves the previous values in place

pub mod collector;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod stats;
pub mod telemetry;

pub use config::Config;

use axum::{
    Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use mongodb::Client;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use crate::{collector::Collector, db::ChatDb, metrics::UsageMetrics};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub config: Config,
}

/// Build the exporter router: a health check plus the scrape endpoint.
pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(serve_metrics))
        .with_state(state.clone())
}

async fn healthz() -> &'static str {
    "OK"
}

/// Render the registry in the Prometheus text exposition format. Before the
/// first collection cycle completes this serves registered-but-empty families,
/// which scrapers handle fine.
async fn serve_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {e}");
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}

/// Handles to the background collection task for coordinated shutdown.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Cancels the token if the application is dropped without a clean shutdown
    _drop_guard: DropGuard,
}

impl BackgroundServices {
    /// Signal all background tasks to stop and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            if let Err(e) = handle.await {
                error!("Background task panicked during shutdown: {e}");
            }
        }
    }
}

/// The assembled exporter: router, database client, and collection daemon.
pub struct Application {
    router: Router,
    config: Config,
    client: Client,
    bg_services: BackgroundServices,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting exporter with configuration: {:#?}", config);

        // Connection establishment is lazy; a bad URI surfaces on first query
        let client = Client::with_uri_str(&config.database.uri).await?;
        let db = ChatDb::new(&client, &config.database.name);

        let registry = Registry::new();
        let metrics = UsageMetrics::new(&registry)?;

        let shutdown_token = CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();

        let collector = Collector::new(db, metrics, config.collector.clone());
        let collector_shutdown = shutdown_token.clone();
        let collector_task = tokio::spawn(async move { collector.run_daemon(collector_shutdown).await });

        let bg_services = BackgroundServices {
            background_tasks: vec![collector_task],
            shutdown_token,
            _drop_guard: drop_guard,
        };

        let state = AppState {
            registry,
            config: config.clone(),
        };
        let router = build_router(&state);

        Ok(Self {
            router,
            config,
            client,
            bg_services,
        })
    }

    /// Serve until the shutdown future resolves, then stop the collector and
    /// close the database connection.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Usage exporter listening on http://{bind_addr}");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connection...");
        self.client.shutdown().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::UsageSnapshot;
    use crate::db::models::{DailyUniqueUsers, ModelCount, ModelDailyMessages, ModelDay};
    use axum_test::TestServer;

    fn state_with_snapshot(snapshot: Option<&UsageSnapshot>) -> AppState {
        let registry = Registry::new();
        let metrics = UsageMetrics::new(&registry).expect("Failed to create metrics");
        if let Some(snapshot) = snapshot {
            metrics.publish(snapshot);
        }
        AppState {
            registry,
            config: Config::default(),
        }
    }

    fn sample_snapshot() -> UsageSnapshot {
        UsageSnapshot {
            total_messages: 42,
            total_errors: 3,
            total_conversations: 10,
            total_input_tokens: 1200,
            total_output_tokens: 3400,
            messages_per_model: vec![ModelCount {
                model: "claude-sonnet".to_string(),
                count: 42,
            }],
            errors_per_model: vec![],
            input_tokens_per_model: vec![],
            output_tokens_per_model: vec![],
            active_users: 5,
            active_conversations: 7,
            unique_users_yesterday: 12,
            daily_unique_users: vec![DailyUniqueUsers {
                day: "2026-08-22".to_string(),
                count: 4,
            }],
            messages_per_user: vec![21, 21],
            model_daily_messages: vec![ModelDailyMessages {
                key: ModelDay {
                    model: "claude-sonnet".to_string(),
                    day: "2026-08-22".to_string(),
                },
                count: 42,
            }],
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_healthz() {
        let server = TestServer::new(build_router(&state_with_snapshot(None))).expect("Failed to build test server");

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_endpoint_exposes_published_values() {
        let snapshot = sample_snapshot();
        let server = TestServer::new(build_router(&state_with_snapshot(Some(&snapshot))))
            .expect("Failed to build test server");

        let response = server.get("/metrics").await;
        response.assert_status_ok();
        assert!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/plain")),
            "scrape endpoint should serve the text exposition format"
        );

        let body = response.text();
        assert!(body.contains("chat_messages_total 42"), "body:\n{body}");
        assert!(body.contains("chat_unique_users_yesterday 12"), "body:\n{body}");
        assert!(
            body.contains(r#"chat_messages_per_model_total{model="claude-sonnet"} 42"#),
            "body:\n{body}"
        );
        assert!(
            body.contains(r#"chat_daily_unique_users{day="2026-08-22"} 4"#),
            "body:\n{body}"
        );
        // Two users with 21 messages each
        assert!(body.contains("chat_messages_per_user_mean 21"), "body:\n{body}");
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_endpoint_serves_all_families() {
        let snapshot = sample_snapshot();
        let server = TestServer::new(build_router(&state_with_snapshot(Some(&snapshot))))
            .expect("Failed to build test server");

        let body = server.get("/metrics").await.text();
        for name in [
            "chat_messages_total",
            "chat_errors_total",
            "chat_conversations_total",
            "chat_input_tokens_total",
            "chat_output_tokens_total",
            "chat_messages_per_model_total",
            "chat_errors_per_model_total",
            "chat_input_tokens_per_model_total",
            "chat_output_tokens_per_model_total",
            "chat_active_users",
            "chat_active_conversations",
            "chat_unique_users_yesterday",
            "chat_daily_unique_users",
            "chat_daily_unique_users_mean",
            "chat_daily_unique_users_stddev",
            "chat_messages_per_user_mean",
            "chat_messages_per_user_stddev",
            "chat_model_daily_messages",
            "chat_model_daily_messages_mean",
            "chat_model_daily_messages_stddev",
        ] {
            assert!(body.contains(name), "missing {name} in exposition:\n{body}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_endpoint_before_first_cycle() {
        let server = TestServer::new(build_router(&state_with_snapshot(None))).expect("Failed to build test server");

        let response = server.get("/metrics").await;
        response.assert_status_ok();

        // Scalar gauges exist at zero, labeled families have no samples yet
        let body = response.text();
        assert!(body.contains("chat_messages_total 0"), "body:\n{body}");
        assert!(
            !body.contains("chat_daily_unique_users{"),
            "no day samples should exist before the first cycle:\n{body}"
        );
    }
}
