use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

use coupon_service::config::Config;
use coupon_service::consumers::{IssuanceWriter, RetryPolicy};
use coupon_service::db::{CouponRepository, EventRepository};
use coupon_service::handlers;
use coupon_service::jobs::ReconciliationJob;
use coupon_service::kafka::{IssuanceProducer, IssuancePublisher, PublishRetryPolicy};
use coupon_service::services::{AdminService, IssuanceService};
use coupon_service::store::{CouponStore, DecisionStore};
use redis_utils::RedisPool;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting coupon-service");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };
    info!(
        "Configuration loaded: env={}, http_port={}",
        config.app.env, config.app.http_port
    );

    match run(config).await {
        Ok(()) => {
            info!("coupon-service shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal startup error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    // Database pool
    let connect_options = PgConnectOptions::from_str(&config.database.url)
        .context("Failed to parse DATABASE_URL")?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    // Decision store. The pool owns the keepalive task, so it must live as
    // long as the service does.
    let redis_pool = RedisPool::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let store: Arc<dyn DecisionStore> = Arc::new(CouponStore::new(redis_pool.manager()));
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify Redis connection: {}", e))?;
    info!("Redis connection established");

    // Issuance event producer
    let publisher: Arc<dyn IssuancePublisher> = Arc::new(
        IssuanceProducer::new(&config.kafka, PublishRetryPolicy::default())
            .context("Failed to create Kafka producer")?,
    );
    publisher
        .check_connectivity()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify Kafka connectivity: {}", e))?;
    info!("Kafka producer connected");

    // Services
    let issuance_service = Arc::new(IssuanceService::new(
        store.clone(),
        publisher.clone(),
        config.issuance.participant_ttl_secs,
        Duration::from_millis(config.issuance.decision_deadline_ms),
    ));
    let admin_service = Arc::new(AdminService::new(
        store.clone(),
        EventRepository::new(pg_pool.clone()),
        CouponRepository::new(pg_pool.clone()),
        config.issuance.participant_ttl_secs,
    ));

    let mut join_set: JoinSet<Result<()>> = JoinSet::new();

    // Durable writer
    let writer = IssuanceWriter::new(&config.kafka, pg_pool.clone(), RetryPolicy::default())
        .context("Failed to create issuance writer")?;
    join_set.spawn(writer.run());

    // Reconciliation job
    let reconciliation = ReconciliationJob::new(
        store.clone(),
        EventRepository::new(pg_pool.clone()),
        CouponRepository::new(pg_pool.clone()),
        Duration::from_secs(config.reconciliation.interval_secs),
        config.issuance.participant_ttl_secs,
    );
    join_set.spawn(async move {
        reconciliation.run().await;
        Ok(())
    });

    // HTTP server
    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    let http_pool = pg_pool.clone();
    let http_store = store.clone();
    let http_publisher = publisher.clone();
    let http_issuance = issuance_service.clone();
    let http_admin = admin_service.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(http_pool.clone()))
            .app_data(web::Data::new(http_store.clone()))
            .app_data(web::Data::new(http_publisher.clone()))
            .app_data(web::Data::new(http_issuance.clone()))
            .app_data(web::Data::new(http_admin.clone()))
            .configure(handlers::configure)
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .run();

    join_set.spawn(async move {
        server
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
    });

    info!("All services started, listening on http://{}", http_addr);

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
        result = join_set.join_next() => {
            match result {
                Some(Ok(Ok(()))) => Err(anyhow::anyhow!("a supervised task exited unexpectedly")),
                Some(Ok(Err(e))) => Err(e),
                Some(Err(e)) => Err(anyhow::anyhow!("Task panicked: {}", e)),
                None => Err(anyhow::anyhow!("no supervised tasks were running")),
            }
        }
    }
}
