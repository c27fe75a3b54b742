pub mod catalog;
pub mod config;
pub mod destination;
pub mod error;
pub mod event;
pub mod mapper;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod schema;
pub mod source;
pub mod test_utils;
