use thiserror::Error;

/// Errors raised while talking to the broker.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to connect to broker at {host}: {error}")]
    ConnectionError { host: String, error: lapin::Error },
    #[error("failed to set up {what}: {error}")]
    TopologyError {
        what: &'static str,
        error: lapin::Error,
    },
    #[error("failed to receive a delivery: {0}")]
    DeliveryError(#[source] lapin::Error),
    #[error("failed to acknowledge a delivery: {0}")]
    AckError(#[source] lapin::Error),
    #[error("the consumer stream was closed by the broker")]
    StreamClosed,
}
