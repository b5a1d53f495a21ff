use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::availability::{
    NewProviderSchedule, NewScheduleException, ProviderSchedule, ScheduleException,
};
use crate::filter::{AppointmentFilter, ProviderScheduleFilter, WaitlistFilter};
use crate::models::{
    Appointment, AppointmentPatch, NewAppointment, NewRecurrenceRule, RecurrenceRule,
    RecurrenceRulePatch,
};
use crate::waitlist::{NewWaitlistEntry, WaitlistEntry};

/// Failures reported by a persistence backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The transaction lost a serialization race or deadlocked and may be retried
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: Uuid },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SerializationFailure(_) | Self::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entry point of a persistence backend.
///
/// Every unit of work runs inside a [`StoreTransaction`] at serializable
/// isolation. Backends must report lost serialization races as
/// [`StoreError::SerializationFailure`] so the caller can retry.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// A single serializable transaction.
///
/// Writes become visible to other transactions only after [`commit`].
/// Dropping the transaction without committing discards its writes.
///
/// [`commit`]: StoreTransaction::commit
#[async_trait]
pub trait StoreTransaction: Send {
    // Appointments

    /// Matching appointments ordered by start time ascending
    async fn find_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>>;

    async fn get_appointment(&mut self, id: Uuid) -> StoreResult<Option<Appointment>>;

    async fn create_appointment(&mut self, appointment: NewAppointment) -> StoreResult<Appointment>;

    /// Bulk insert; either every row is written or none is
    async fn create_appointments(
        &mut self,
        appointments: Vec<NewAppointment>,
    ) -> StoreResult<Vec<Appointment>>;

    async fn update_appointment(&mut self, id: Uuid, patch: AppointmentPatch) -> StoreResult<Appointment>;

    /// Returns the number of deleted rows
    async fn delete_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<u64>;

    // Recurrence rules

    async fn create_rule(&mut self, rule: NewRecurrenceRule) -> StoreResult<RecurrenceRule>;

    async fn get_rule(&mut self, id: Uuid) -> StoreResult<Option<RecurrenceRule>>;

    async fn update_rule(&mut self, id: Uuid, patch: RecurrenceRulePatch) -> StoreResult<RecurrenceRule>;

    async fn delete_rule(&mut self, id: Uuid) -> StoreResult<()>;

    // Waitlist

    async fn create_waitlist_entry(&mut self, entry: NewWaitlistEntry) -> StoreResult<WaitlistEntry>;

    /// Ordered by priority descending, then creation time ascending
    async fn find_waitlist_entries(&mut self, filter: &WaitlistFilter) -> StoreResult<Vec<WaitlistEntry>>;

    async fn mark_waitlist_fulfilled(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<WaitlistEntry>;

    // Provider availability

    async fn create_provider_schedule(
        &mut self,
        schedule: NewProviderSchedule,
    ) -> StoreResult<ProviderSchedule>;

    /// Ordered by day of week, then start time
    async fn find_provider_schedules(
        &mut self,
        filter: &ProviderScheduleFilter,
    ) -> StoreResult<Vec<ProviderSchedule>>;

    async fn create_schedule_exception(
        &mut self,
        exception: NewScheduleException,
    ) -> StoreResult<ScheduleException>;

    /// Ordered by exception date
    async fn find_schedule_exceptions(
        &mut self,
        provider_id: Option<Uuid>,
    ) -> StoreResult<Vec<ScheduleException>>;

    // Completion

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
