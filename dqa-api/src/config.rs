use envconfig::Envconfig;

use dqa_common::config::{CatalogConfig, StoreConfig};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8000")]
    pub port: u16,

    #[envconfig(default = "1000000")]
    pub max_body_size: usize,

    #[envconfig(default = "100")]
    pub concurrency_limit: usize,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub catalog: CatalogConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
