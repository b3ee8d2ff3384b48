//! Integration and unit tests for the Fundbuero backend.
//!
//! ## Test Modules
//!
//! - **support**: shared fixtures (temp database, in-memory image store, HTTP helpers)
//! - **catalog_tests**: item writes, validation, lifecycle and deletion
//! - **index_tests**: filters, sorting, pagination and index rebuilds
//! - **matching_tests**: matching passes, idempotency and staleness
//! - **api_tests**: the HTTP gateway end to end
//! - **error_tests**: error to response mapping
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: schema and constraints
//! - **health_api_tests**: health, readiness, metrics and version endpoints
//!
//! Individual modules can be run with e.g. `cargo test catalog_tests`.

pub mod support;

pub mod catalog_tests;
pub mod matching_tests;
