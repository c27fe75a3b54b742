use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use dqa_common::catalog::IndicatorCatalog;
use dqa_common::destination::PgDestinationStore;
use dqa_common::metrics::setup_metrics_routes;
use dqa_common::pipeline::Pipeline;
use dqa_common::source::PgSourceStore;

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let catalog = IndicatorCatalog::load(&config.catalog).expect("failed to load query catalog");
    let source = PgSourceStore::new(
        &config.store.source_database_url,
        config.store.max_pg_connections,
    )
    .expect("failed to create source store");
    let destination = PgDestinationStore::new(
        &config.store.destination_database_url,
        config.store.max_pg_connections,
    )
    .expect("failed to create destination store");
    destination
        .run_migrations()
        .await
        .expect("failed to create destination tables");

    let pipeline = Pipeline::new(Arc::new(catalog), Arc::new(source), Arc::new(destination));

    let app = handlers::add_routes(
        Router::new(),
        pipeline,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start dqa-api http server, {}", e),
    }
}
