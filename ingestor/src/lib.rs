//! SenML telemetry ingestion, station registry reconciliation and cursor
//! paginated time-range queries.

pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod pagination;
pub mod planner;
pub mod query;
pub mod rest;
pub mod senml;
pub mod stations;
pub mod store;
pub mod validate;
pub mod worker;
