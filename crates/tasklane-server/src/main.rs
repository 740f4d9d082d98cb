// Tasklane server
// Decision: one binary hosts the HTTP surface and all four consumers;
// scale-out runs more instances (reminder transitions and idempotency
// claims make that safe)
// Decision: in-memory stores when DATABASE_URL is unset, for local runs

mod api;
mod auth;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tasklane_bus::{
    ConsumerConfig, ConsumerWorker, EventBus, IdempotencyGuard, InMemoryBus,
    InMemoryKeyValueStore, Publisher,
};
use tasklane_core::{ActivityLogEntry, ActivityPage, Topic};
use tasklane_engine::{
    ActivityLogConsumer, ChannelRouter, NotificationDispatcher, RecurrenceEngine,
    ReminderCancellation, ReminderScheduler, SchedulerConfig, WebhookChannel, WebhookConfig,
};
use tasklane_store::{
    ActivityStore, InMemoryActivityStore, InMemoryTaskStore, PostgresStore, TaskStore,
};
use tasklane_sync::{ConnectionRegistry, InAppChannel, ReplayBuffer, SyncBroadcaster};

use crate::config::ServerConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(api::activity::list_activity, api::status::ws_status),
    components(schemas(
        ActivityPage,
        ActivityLogEntry,
        api::common::ErrorResponse,
        api::status::WsStatus,
    )),
    tags(
        (name = "activity", description = "Activity audit trail queries"),
        (name = "sync", description = "Real-time sync status")
    ),
    info(
        title = "Tasklane API",
        description = "Event-driven task lifecycle engine: activity queries and real-time sync"
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasklane=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(bind_addr = %config.bind_addr, "tasklane-server starting");

    // The bus adapter. The in-process broker carries full delivery
    // semantics (partition ordering, consumer groups, redelivery); a
    // clustered deployment swaps in a client for the managed broker
    // behind the same EventBus trait.
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());

    // Stores: PostgreSQL when configured, in-memory otherwise.
    let (task_store, activity_store): (Arc<dyn TaskStore>, Arc<dyn ActivityStore>) =
        match &config.database_url {
            Some(url) => {
                let store = PostgresStore::from_url(url)
                    .await
                    .context("failed to connect to database")?;
                store.migrate().await.context("failed to run migrations")?;
                tracing::info!("connected to database");
                (Arc::new(store.clone()), Arc::new(store))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(InMemoryTaskStore::new()),
                    Arc::new(InMemoryActivityStore::new()),
                )
            }
        };

    let guard = Arc::new(IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())));
    let publisher = Publisher::new(bus.clone());

    // Real-time layer.
    let registry = Arc::new(ConnectionRegistry::new());
    let replay = Arc::new(ReplayBuffer::with_window(config.replay_window));
    let broadcaster = Arc::new(SyncBroadcaster::new(
        registry.clone(),
        replay.clone(),
        guard.clone(),
    ));

    // Delivery channels: in-app always, webhook when configured.
    let mut channels = ChannelRouter::new(Arc::new(InAppChannel::new(registry.clone())));
    if let Some(endpoint) = &config.webhook_endpoint {
        tracing::info!(endpoint = %endpoint, "webhook delivery channel enabled");
        channels = channels.register(Arc::new(WebhookChannel::new(WebhookConfig::new(endpoint))));
    }

    // Consumers.
    let dispatcher = Arc::new(NotificationDispatcher::new(
        task_store.clone(),
        Arc::new(channels),
        guard.clone(),
        publisher.clone(),
    ));
    let cancellation = Arc::new(ReminderCancellation::new(task_store.clone()));
    let recurrence = Arc::new(RecurrenceEngine::new(
        task_store.clone(),
        guard.clone(),
        publisher.clone(),
    ));
    let activity = Arc::new(ActivityLogConsumer::new(activity_store.clone(), guard.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = vec![
        ConsumerWorker::new(
            bus.clone(),
            Topic::ReminderDue,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(dispatcher),
        ConsumerWorker::new(
            bus.clone(),
            Topic::TaskEvents,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(cancellation),
        ConsumerWorker::new(
            bus.clone(),
            Topic::TaskEvents,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(recurrence),
        ConsumerWorker::new(
            bus.clone(),
            Topic::TaskEvents,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(broadcaster.clone()),
        ConsumerWorker::new(
            bus.clone(),
            Topic::TaskEvents,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(activity.clone()),
        // Delivery outcomes feed the audit trail too.
        ConsumerWorker::new(
            bus.clone(),
            Topic::NotificationSend,
            ConsumerConfig::default(),
            shutdown_rx.clone(),
        )
        .spawn(activity),
    ];

    // Time-triggered producer.
    workers.push(
        ReminderScheduler::new(task_store.clone(), publisher.clone())
            .with_config(SchedulerConfig::default().with_interval(config.scheduler_interval))
            .spawn(shutdown_rx.clone()),
    );

    // HTTP surface.
    let activity_state = api::activity::AppState {
        activity: activity_store,
    };
    let status_state = api::status::AppState {
        registry: registry.clone(),
    };
    let ws_state = api::ws::AppState {
        broadcaster,
        auth: auth::Authenticator::new(config.auth_token.clone()),
    };

    let mut app = Router::new()
        .route("/health", get(health))
        .merge(api::activity::routes(activity_state))
        .merge(api::status::routes(status_state))
        .merge(api::ws::routes(ws_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if !cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS origins configured");
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        );
    }
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    // Drain the consumers before exit.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}
