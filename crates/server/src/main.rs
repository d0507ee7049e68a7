//! gbp-worker entry point.
//!
//! Consumes publish jobs from Redis, runs the review polling and auto-reply
//! tasks, and answers `GET /ping` for the process supervisor.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use gbp_common::{Config, get_metrics};
use gbp_core::provider::GoogleBusinessClient;
use gbp_core::{
    AutoReplier, CredentialRefresher, PublishExecutor, ReviewPoller, SystemClock,
    TemplateReplyComposer,
};
use gbp_db::repositories::{LocationRepository, PostRepository, ReviewRepository};
use gbp_queue::{JobQueue, PublishHandler, RedisJobQueue, Worker, review_tasks, run_periodic};
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gbp=info,tower_http=info".into());
    let json = std::env::var("GBP_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Liveness probe.
async fn ping() -> &'static str {
    "pong"
}

fn router() -> Router {
    Router::new()
        .route("/ping", get(ping))
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting gbp-worker...");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Connect to database
    let db = gbp_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    gbp_db::migrate(&db).await?;
    info!("Migrations completed");

    // Connect to Redis
    info!("Connecting to Redis...");
    let queue = Arc::new(
        RedisJobQueue::connect(
            &config.redis.url(),
            &config.redis.prefix,
            &config.worker.queue_name,
        )
        .await?,
    );
    match queue.counts().await {
        Ok(counts) => info!(
            scheduled = counts.scheduled,
            active = counts.active,
            dead = counts.dead,
            "Connected to Redis job queue"
        ),
        Err(e) => warn!(error = %e, "Connected to Redis but could not read queue sizes"),
    }

    // Initialize stores
    let db = Arc::new(db);
    let posts = Arc::new(PostRepository::new(Arc::clone(&db)));
    let locations = Arc::new(LocationRepository::new(Arc::clone(&db)));
    let reviews = Arc::new(ReviewRepository::new(Arc::clone(&db)));

    // Initialize services
    let clock = Arc::new(SystemClock);
    let provider = Arc::new(GoogleBusinessClient::new(&config.provider));
    let credentials = Arc::new(CredentialRefresher::new(
        locations.clone(),
        provider.clone(),
        clock.clone(),
    ));
    let executor = Arc::new(PublishExecutor::new(
        posts,
        credentials.clone(),
        provider.clone(),
        clock.clone(),
        config.provider.language_code.clone(),
    ));
    let poller = Arc::new(ReviewPoller::new(
        locations,
        reviews.clone(),
        credentials.clone(),
        provider.clone(),
    ));
    let replier = Arc::new(AutoReplier::new(
        reviews,
        credentials,
        provider,
        Arc::new(TemplateReplyComposer),
        clock.clone(),
        config.periodic.auto_reply_batch_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the publish worker
    let worker = Worker::new(
        queue.clone(),
        Arc::new(PublishHandler::new(executor)),
        clock,
        &config.worker,
    );
    let worker_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    info!(
        queue = %config.worker.queue_name,
        concurrency = config.worker.concurrency,
        "Publish worker started"
    );

    // Start periodic tasks
    let tasks = review_tasks(&config.periodic, poller, replier);
    info!(count = tasks.len(), "Starting periodic tasks");
    let periodic_task = tokio::spawn(run_periodic(tasks, shutdown_rx));

    // Start health endpoint with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work and wait for in-flight attempts
    info!("Waiting for in-flight jobs to finish...");
    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks already stopped");
    }
    if let Err(e) = worker_task.await {
        error!(error = %e, "Publish worker ended abnormally");
    }
    if let Err(e) = periodic_task.await {
        error!(error = %e, "Periodic runner ended abnormally");
    }

    if let Err(e) = queue.quit().await {
        warn!(error = %e, "Failed to close Redis connection");
    }
    match Arc::try_unwrap(db) {
        Ok(db) => {
            if let Err(e) = db.close().await {
                warn!(error = %e, "Failed to close database connection");
            }
        }
        Err(_) => warn!("Database connection still shared, leaving it to drop"),
    }

    let metrics = get_metrics().snapshot();
    info!(
        enqueued = metrics.jobs_enqueued,
        completed = metrics.jobs_completed,
        retried = metrics.jobs_retried,
        dead = metrics.jobs_dead,
        published = metrics.publishes_succeeded,
        publish_failures = metrics.publishes_failed,
        "Worker shutdown complete"
    );
    Ok(())
}
