//! Appointment scheduling core for RustCare Engine
//!
//! This crate books single and recurring appointments for behavioural-health
//! practices and keeps them consistent under concurrent use:
//! - Recurrence expansion (daily, weekly, monthly, yearly) with business-day filtering
//! - Provider/client double-booking detection on half-open time windows
//! - Appointment status state machine with per-status timestamps
//! - Series edits that keep history and regenerate the future
//! - Serializable transactions with retry, backoff and per-attempt timeouts
//! - Waitlist and provider availability records
//!
//! Persistence is behind [`SchedulingStore`]; `database-layer` provides the
//! PostgreSQL backend and [`InMemorySchedulingStore`] serves tests.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use scheduling_engine::{
//!     AppointmentDetails, CreateAppointmentRequest, InMemorySchedulingStore, SchedulingConfig,
//!     SchedulingEngine,
//! };
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SchedulingEngine::new(Arc::new(InMemorySchedulingStore::new()), SchedulingConfig::default());
//!
//!     let provider = Uuid::new_v4();
//!     let request = CreateAppointmentRequest::new(
//!         Uuid::new_v4(),
//!         Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap(),
//!         AppointmentDetails::new("therapy", 50),
//!     );
//!     let booking = engine.appointments.create_single(&request, provider).await?;
//!     assert_eq!(booking.appointment.provider_id, provider);
//!     Ok(())
//! }
//! ```

pub mod availability;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod meetings;
pub mod memory;
pub mod models;
pub mod notifications;
pub mod recurrence;
pub mod rules;
pub mod store;
pub mod transaction;
pub mod waitlist;

pub use availability::*;
pub use cache::TtlCache;
pub use config::SchedulingConfig;
pub use conflict::*;
pub use engine::SchedulingEngine;
pub use error::*;
pub use filter::*;
pub use lifecycle::*;
pub use meetings::*;
pub use memory::{FaultInjector, InMemorySchedulingStore};
pub use models::*;
pub use notifications::*;
pub use recurrence::{end_of_day, generate_dates, is_business_day, parse_time_of_day};
pub use rules::RecurringRuleStore;
pub use store::*;
pub use transaction::*;
pub use waitlist::*;
