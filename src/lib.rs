pub mod alerting;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod error_handler;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod tasks;
