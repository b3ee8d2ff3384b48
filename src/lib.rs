//! # Fundbuero Backend Library
//!
//! Server side of a lost-and-found app: users report lost or found items
//! with photos, browse and search the catalog, and get ranked matches
//! between lost and found reports.
//!
//! ## Architecture
//!
//! - **Axum** for HTTP routing and middleware
//! - **SQLx** on SQLite for persistence
//! - **Tokio** for the async runtime and the matching worker
//!
//! ## Core Components
//!
//! - [`store`]: row persistence and the image blob store
//! - [`catalog`]: validated, serialized item writes and lifecycle rules
//! - [`index`]: search index maintained in the write transaction
//! - [`matching`]: queue, worker and scoring for lost/found candidates
//! - [`routes`] and [`middleware`]: the HTTP gateway
//! - [`config`], [`error`], [`metrics`], [`state`]: ambient plumbing

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod index;
pub mod matching;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
