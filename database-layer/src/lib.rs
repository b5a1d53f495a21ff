//! PostgreSQL persistence for the scheduling engine
//!
//! Implements [`scheduling_engine::SchedulingStore`] on a pooled PostgreSQL
//! connection. Every store transaction runs at SERIALIZABLE isolation, and
//! SQLSTATE 40001/40P01 are reported as retryable serialization failures so
//! the engine's transaction runner can replay the unit of work.
//!
//! Schema migrations live in `migrations/` and are applied with
//! [`DatabasePool::migrate`] or by setting `run_migrations` in
//! [`DatabaseConfig`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use database_layer::{DatabaseConfig, DatabasePool, PgSchedulingStore};
//! use scheduling_engine::{SchedulingConfig, SchedulingEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = DatabasePool::connect(&DatabaseConfig {
//!         url: "postgresql://localhost:5432/rustcare".into(),
//!         run_migrations: true,
//!         ..DatabaseConfig::default()
//!     })
//!     .await?;
//!
//!     let engine = SchedulingEngine::new(
//!         Arc::new(PgSchedulingStore::new(pool)),
//!         SchedulingConfig::load(None)?,
//!     );
//!     let open = engine.waitlist.open_entries().await?;
//!     println!("{} clients waiting", open.len());
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod query;
pub mod transaction;

pub use connection::{DatabaseConfig, DatabasePool};
pub use error::{classify, DatabaseError, DatabaseResult};
pub use transaction::{PgSchedulingStore, PgTransaction};
