//! # Enrichment Pipeline
//!
//! Batch enrichment of contact records against a people-match API.
//!
//! ## Usage
//!
//! ```bash
//! enrich run leads.csv --api-key KEY
//! enrich history
//! enrich serve --bind 127.0.0.1:5000
//! ```
//!
//! ## Modules
//!
//! - `record` - Row validation and domain extraction
//! - `table` - CSV loading and the enriched output table
//! - `client` - Bulk-match API client and response classification
//! - `scheduler` - Sequential, rate-limited batch execution of a job
//! - `jobs` - In-memory job registry with per-job logs
//! - `history` - Append-only log of finished jobs
//! - `service` - Job submission, cancellation and waiting
//! - `server` - JSON API over the service
//! - `config` - Configuration file and environment handling
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod table;

pub use error::{Error, Result};
