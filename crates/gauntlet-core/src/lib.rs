pub mod catalog;
pub mod config;
pub mod connectors;
pub mod errors;
pub mod metrics_api;
pub mod model;
pub mod run;
pub mod storage;
