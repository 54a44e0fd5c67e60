pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod storage;
pub mod warehouse;
