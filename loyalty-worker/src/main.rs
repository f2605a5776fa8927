//! Consume change events to maintain loyalty aggregates.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;

use loyalty_common::eventqueue::PgEventQueue;
use loyalty_common::health::HealthRegistry;
use loyalty_common::metrics::{serve, setup_metrics_routes};
use loyalty_common::store::postgres::PostgresStore;
use loyalty_worker::config::Config;
use loyalty_worker::error::WorkerError;
use loyalty_worker::milestones::MilestoneTable;
use loyalty_worker::worker::LoyaltyWorker;

async fn index() -> &'static str {
    "loyalty worker"
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker".to_string(), time::Duration::seconds(30))
        .await;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to PostgreSQL");

    let queue = PgEventQueue::new_from_pool(config.queue_table.as_str(), pool.clone());
    let store = Arc::new(PostgresStore::new_from_pool(pool));

    let worker = LoyaltyWorker::new(
        &config.worker_name,
        &queue,
        store,
        MilestoneTable::default(),
        config.poll_interval.0,
        config.max_concurrent_events,
        config.dedup_events,
        worker_liveness,
    );

    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);

    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    worker.run().await?;

    Ok(())
}
