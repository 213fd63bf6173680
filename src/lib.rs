pub mod alerts;
pub mod api;
pub mod config;
pub mod control;
pub mod models;
pub mod notify;
pub mod reading_cache;
pub mod registry;
pub mod rtdb;
pub mod telemetry;
