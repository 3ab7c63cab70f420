//! `PostgreSQL` lease store for Seatlease.
//!
//! This crate provides a durable implementation of the `LeaseStore` trait from
//! `seatlease-core`. It supports:
//!
//! - One row per resource with a version column as the compare-and-swap token
//! - Atomic multi-resource batches (commit, cancel) in a single transaction
//! - Allocation records with newest-first listing per owner
//! - Connection pooling and embedded migrations
//!
//! Several service instances may share one database: the version check catches
//! writes that race across processes, which the per-process locks cannot see.
//!
//! # Example
//!
//! ```ignore
//! use seatlease_postgres::PostgresLeaseStore;
//! use seatlease_runtime::{LeaseConfig, LeasingService};
//!
//! let store = PostgresLeaseStore::connect("postgres://localhost/seatlease").await?;
//! store.migrate().await?;
//! let service = LeasingService::new(Arc::new(store), Arc::new(SystemClock), LeaseConfig::from_env())?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

/// The `LeaseStore` implementation
pub mod store;

pub use store::PostgresLeaseStore;
