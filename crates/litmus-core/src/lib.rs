pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod interface;
pub mod model;
pub mod providers;
pub mod registry;
pub mod report;
pub mod storage;
pub mod strategy_api;
