//! Consume DQA events from RabbitMQ and write indicator results to the destination store.
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dqa_common::catalog::IndicatorCatalog;
use dqa_common::destination::PgDestinationStore;
use dqa_common::metrics::setup_metrics_routes;
use dqa_common::pipeline::Pipeline;
use dqa_common::source::PgSourceStore;
use dqa_consumer::config::Config;
use dqa_consumer::consumer::DqaConsumer;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

pub async fn index() -> &'static str {
    "dqa consumer"
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

    let liveness = HealthRegistry::new("liveness");
    let idle_report_interval = Duration::from_secs(config.idle_report_interval_secs);
    let consumer_liveness = liveness.register(
        "consumer",
        time::Duration::seconds(config.idle_report_interval_secs as i64 * 4),
    );

    let mut consumer = DqaConsumer::connect(
        &config.amqp,
        pipeline,
        idle_report_interval,
        Duration::from_secs(config.max_pipeline_duration_secs),
        consumer_liveness,
    )
    .await
    .expect("failed to start consuming");

    let consumer_loop = tokio::spawn(async move { consumer.run().await });

    let app = setup_metrics_routes(app(liveness));
    let http_server = tokio::spawn(listen(app, config.bind()));

    tokio::select! {
        res = consumer_loop => {
            error!("consumer loop exited");
            match res {
                Ok(Err(e)) => error!("consumer failed with: {}", e),
                Err(e) => error!("consumer task failed with: {}", e),
                Ok(Ok(())) => {}
            }
        }
        res = http_server => {
            error!("http server exited");
            match res {
                Ok(Err(e)) => error!("server failed with: {}", e),
                Err(e) => error!("server task failed with: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("exiting");
}
