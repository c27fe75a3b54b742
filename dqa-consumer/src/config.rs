use envconfig::Envconfig;

use dqa_common::config::{CatalogConfig, NonEmptyString, StoreConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    /// How long to wait for a delivery before reporting liveness anyway.
    #[envconfig(default = "10")]
    pub idle_report_interval_secs: u64,

    /// How long one pipeline run may take before the consumer stops reporting healthy.
    #[envconfig(default = "600")]
    pub max_pipeline_duration_secs: u64,

    #[envconfig(nested = true)]
    pub amqp: AmqpConfig,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub catalog: CatalogConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct AmqpConfig {
    #[envconfig(default = "guest")]
    pub rabbitmq_username: String,

    #[envconfig(default = "guest")]
    pub rabbitmq_password: String,

    #[envconfig(default = "localhost")]
    pub rabbitmq_host: String,

    #[envconfig(default = "5672")]
    pub rabbitmq_port: u16,

    #[envconfig(default = "/")]
    pub rabbitmq_virtual_host: String,

    #[envconfig(default = "dqa.exchange")]
    pub rabbitmq_exchange_name: NonEmptyString,

    #[envconfig(default = "dqa.queue")]
    pub rabbitmq_queue_name: NonEmptyString,

    #[envconfig(default = "dqa.route")]
    pub rabbitmq_route_key: String,

    #[envconfig(default = "dqa-consumer")]
    pub rabbitmq_consumer_tag: String,

    #[envconfig(default = "1")]
    pub rabbitmq_prefetch_count: u16,
}

impl AmqpConfig {
    /// The amqp:// URI for these settings. The virtual host is a path segment, so `/` in it
    /// is percent-encoded.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.rabbitmq_username,
            self.rabbitmq_password,
            self.rabbitmq_host,
            self.rabbitmq_port,
            self.rabbitmq_virtual_host.replace('/', "%2f"),
        )
    }

    /// The URI without credentials, for logging.
    pub fn redacted_uri(&self) -> String {
        format!(
            "amqp://{}:{}/{}",
            self.rabbitmq_host,
            self.rabbitmq_port,
            self.rabbitmq_virtual_host.replace('/', "%2f"),
        )
    }
}
