// Shared library for the extension adapter: models, stores, caches,
// dispatch queue, and the orchestration service used by the API binary.

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metadata;
pub mod models;
pub mod queue;
pub mod service;
pub mod telemetry;
