//! Consume DQA events from a RabbitMQ queue and run them through the pipeline.
use std::future::Future;
use std::time::{Duration, Instant};

use futures::StreamExt;
use health::HealthHandle;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, error, info, warn};

use dqa_common::error::MalformedPayload;
use dqa_common::pipeline::{Pipeline, PipelineReport};

use crate::config::AmqpConfig;
use crate::error::ConsumerError;

/// What happened to a single delivery. Both variants are acknowledged.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Processed(PipelineReport),
    Discarded(MalformedPayload),
}

/// Run one delivery body through the pipeline.
///
/// Redelivering a malformed payload would only fail again, so it is discarded rather than
/// rejected. Per-indicator failures are already captured in the report.
pub async fn handle_delivery(pipeline: &Pipeline, data: &[u8]) -> DeliveryOutcome {
    let payload = String::from_utf8_lossy(data);
    debug!("received payload: {}", payload);

    match pipeline.process_payload(&payload).await {
        Ok(report) => {
            info!(
                mfl_code = report.mfl_code,
                succeeded = report.succeeded_indicators(),
                "{}",
                report.acknowledgement().message
            );
            DeliveryOutcome::Processed(report)
        }
        Err(e) => DeliveryOutcome::Discarded(e),
    }
}

/// Drive `work` to completion, reporting healthy every `interval` while it runs.
///
/// Reports stop once `max_duration` has elapsed, so a run stuck on a query lets the
/// liveness deadline pass instead of hiding behind the heartbeat.
pub async fn with_heartbeat<F: Future>(
    liveness: &HealthHandle,
    interval: Duration,
    max_duration: Duration,
    work: F,
) -> F::Output {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    tokio::pin!(work);

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => {
                if started.elapsed() < max_duration {
                    liveness.report_healthy();
                } else {
                    warn!("pipeline run exceeded {:?}, no longer reporting healthy", max_duration);
                }
            }
        }
    }
}

/// Declare the exchange, queue and binding this consumer reads from.
async fn declare_topology(channel: &Channel, config: &AmqpConfig) -> Result<(), ConsumerError> {
    let exchange = config.rabbitmq_exchange_name.as_str();
    let queue = config.rabbitmq_queue_name.as_str();

    channel
        .basic_qos(config.rabbitmq_prefetch_count, BasicQosOptions::default())
        .await
        .map_err(|error| ConsumerError::TopologyError {
            what: "prefetch",
            error,
        })?;

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|error| ConsumerError::TopologyError {
            what: "exchange",
            error,
        })?;

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|error| ConsumerError::TopologyError {
            what: "queue",
            error,
        })?;

    channel
        .queue_bind(
            queue,
            exchange,
            &config.rabbitmq_route_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|error| ConsumerError::TopologyError {
            what: "queue binding",
            error,
        })?;

    Ok(())
}

/// A consumer that processes one delivery at a time and acknowledges it once the pipeline
/// run is over.
pub struct DqaConsumer {
    /// Kept so the connection is not closed while consuming.
    _connection: Connection,
    consumer: lapin::Consumer,
    pipeline: Pipeline,
    /// How long to wait for a delivery before reporting liveness anyway. Also the heartbeat
    /// interval while a delivery is processed.
    idle_report_interval: Duration,
    /// How long a single pipeline run may keep the consumer reported as healthy.
    max_pipeline_duration: Duration,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl DqaConsumer {
    pub async fn connect(
        config: &AmqpConfig,
        pipeline: Pipeline,
        idle_report_interval: Duration,
        max_pipeline_duration: Duration,
        liveness: HealthHandle,
    ) -> Result<Self, ConsumerError> {
        let connection = Connection::connect(&config.uri(), ConnectionProperties::default())
            .await
            .map_err(|error| ConsumerError::ConnectionError {
                host: config.redacted_uri(),
                error,
            })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|error| ConsumerError::TopologyError {
                what: "channel",
                error,
            })?;

        declare_topology(&channel, config).await?;

        let consumer = channel
            .basic_consume(
                config.rabbitmq_queue_name.as_str(),
                &config.rabbitmq_consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|error| ConsumerError::TopologyError {
                what: "consumer",
                error,
            })?;

        info!(
            broker = %config.redacted_uri(),
            queue = config.rabbitmq_queue_name.as_str(),
            "waiting for messages"
        );

        Ok(Self {
            _connection: connection,
            consumer,
            pipeline,
            idle_report_interval,
            max_pipeline_duration,
            liveness,
        })
    }

    /// Consume until the broker closes the stream or a delivery cannot be received.
    pub async fn run(&mut self) -> Result<(), ConsumerError> {
        loop {
            self.liveness.report_healthy();

            let delivery = match tokio::time::timeout(
                self.idle_report_interval,
                self.consumer.next(),
            )
            .await
            {
                Err(_) => continue,
                Ok(None) => return Err(ConsumerError::StreamClosed),
                Ok(Some(delivery)) => delivery.map_err(ConsumerError::DeliveryError)?,
            };

            with_heartbeat(
                &self.liveness,
                self.idle_report_interval,
                self.max_pipeline_duration,
                process_delivery(&self.pipeline, delivery),
            )
            .await?;
        }
    }
}

/// Process a delivery and acknowledge it, whatever the outcome.
async fn process_delivery(pipeline: &Pipeline, delivery: Delivery) -> Result<(), ConsumerError> {
    if let DeliveryOutcome::Discarded(e) = handle_delivery(pipeline, &delivery.data).await {
        warn!(
            delivery_tag = delivery.delivery_tag,
            "acknowledging malformed delivery without processing: {}", e
        );
    }

    delivery
        .acker
        .ack(BasicAckOptions::default())
        .await
        .map_err(|e| {
            error!(delivery_tag = delivery.delivery_tag, "ack failed: {}", e);
            ConsumerError::AckError(e)
        })?;

    Ok(())
}
