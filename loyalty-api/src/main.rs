use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use sqlx::postgres::PgPoolOptions;

use loyalty_common::eventqueue::PgEventQueue;
use loyalty_common::metrics::setup_metrics_routes;
use loyalty_common::store::postgres::PostgresStore;
use loyalty_common::store::DocumentStore;

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to PostgreSQL");

    let queue = Arc::new(PgEventQueue::new_from_pool(&config.queue_table, pool.clone()));
    let store: Arc<dyn DocumentStore> = Arc::new(PostgresStore::new_from_pool(pool));

    let app = handlers::add_routes(Router::new(), store, queue);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start loyalty-api http server, {}", e),
    }
}
