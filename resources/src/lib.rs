pub mod config;
pub mod metrics;
pub mod models;
pub mod objects;
