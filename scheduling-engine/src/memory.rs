//! In-memory store for tests and local development
//!
//! Each transaction works on a private snapshot of the committed tables.
//! Commit is optimistic: a transaction that wrote something fails with
//! [`StoreError::SerializationFailure`] when another writer committed after
//! its snapshot was taken, which is how a serializable database reports the
//! same race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::availability::{
    NewProviderSchedule, NewScheduleException, ProviderSchedule, ScheduleException,
};
use crate::filter::{AppointmentFilter, ProviderScheduleFilter, WaitlistFilter};
use crate::models::{
    Appointment, AppointmentPatch, NewAppointment, NewRecurrenceRule, RecurrenceRule,
    RecurrenceRulePatch,
};
use crate::store::{SchedulingStore, StoreError, StoreResult, StoreTransaction};
use crate::waitlist::{NewWaitlistEntry, WaitlistEntry};

#[derive(Debug, Clone, Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    rules: HashMap<Uuid, RecurrenceRule>,
    waitlist: HashMap<Uuid, WaitlistEntry>,
    schedules: HashMap<Uuid, ProviderSchedule>,
    exceptions: HashMap<Uuid, ScheduleException>,
}

#[derive(Debug, Default)]
struct Committed {
    version: u64,
    tables: Tables,
}

/// Failure switches for exercising rollback, retry and timeout paths
#[derive(Debug, Default)]
pub struct FaultInjector {
    bulk_insert_failures: AtomicU32,
    commit_conflicts: AtomicU32,
    latency_ms: AtomicU64,
}

impl FaultInjector {
    /// The next `count` bulk inserts fail with a non-retryable backend error
    pub fn fail_bulk_inserts(&self, count: u32) {
        self.bulk_insert_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` commits fail with a serialization failure
    pub fn fail_commits(&self, count: u32) {
        self.commit_conflicts.store(count, Ordering::SeqCst);
    }

    /// Delay every appointment query by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemorySchedulingStore {
    committed: Arc<RwLock<Committed>>,
    faults: Arc<FaultInjector>,
    commits: Arc<AtomicU64>,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of transactions that committed at least one write
    pub fn committed_writes(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Committed appointments ordered by start time
    pub fn appointments(&self) -> Vec<Appointment> {
        let committed = self.committed.read();
        sorted_appointments(committed.tables.appointments.values().cloned())
    }

    pub fn rule(&self, id: Uuid) -> Option<RecurrenceRule> {
        self.committed.read().tables.rules.get(&id).cloned()
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let (base_version, tables) = {
            let committed = self.committed.read();
            (committed.version, committed.tables.clone())
        };
        Ok(Box::new(InMemoryTransaction {
            base_version,
            tables,
            dirty: false,
            committed: Arc::clone(&self.committed),
            faults: Arc::clone(&self.faults),
            commits: Arc::clone(&self.commits),
        }))
    }
}

pub struct InMemoryTransaction {
    base_version: u64,
    tables: Tables,
    dirty: bool,
    committed: Arc<RwLock<Committed>>,
    faults: Arc<FaultInjector>,
    commits: Arc<AtomicU64>,
}

impl InMemoryTransaction {
    async fn simulate_latency(&self) {
        if let Some(latency) = self.faults.latency() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn sorted_appointments(appointments: impl Iterator<Item = Appointment>) -> Vec<Appointment> {
    let mut appointments: Vec<Appointment> = appointments.collect();
    appointments.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    appointments
}

fn not_found(resource: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { resource, id }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        self.simulate_latency().await;
        Ok(sorted_appointments(
            self.tables
                .appointments
                .values()
                .filter(|a| filter.matches(a))
                .cloned(),
        ))
    }

    async fn get_appointment(&mut self, id: Uuid) -> StoreResult<Option<Appointment>> {
        Ok(self.tables.appointments.get(&id).cloned())
    }

    async fn create_appointment(&mut self, appointment: NewAppointment) -> StoreResult<Appointment> {
        if let Some(rule_id) = appointment.recurrence_rule_id {
            if !self.tables.rules.contains_key(&rule_id) {
                return Err(StoreError::Constraint(format!(
                    "recurrence rule {} does not exist",
                    rule_id
                )));
            }
        }
        let created = appointment.into_appointment(Uuid::new_v4(), Utc::now());
        self.tables.appointments.insert(created.id, created.clone());
        self.dirty = true;
        Ok(created)
    }

    async fn create_appointments(
        &mut self,
        appointments: Vec<NewAppointment>,
    ) -> StoreResult<Vec<Appointment>> {
        if FaultInjector::take(&self.faults.bulk_insert_failures) {
            return Err(StoreError::Backend("injected bulk insert failure".to_string()));
        }

        // Stage first so a constraint failure leaves the snapshot untouched
        let now = Utc::now();
        let mut staged = Vec::with_capacity(appointments.len());
        for appointment in appointments {
            if let Some(rule_id) = appointment.recurrence_rule_id {
                if !self.tables.rules.contains_key(&rule_id) {
                    return Err(StoreError::Constraint(format!(
                        "recurrence rule {} does not exist",
                        rule_id
                    )));
                }
            }
            staged.push(appointment.into_appointment(Uuid::new_v4(), now));
        }

        for appointment in &staged {
            self.tables.appointments.insert(appointment.id, appointment.clone());
        }
        self.dirty = true;
        debug!(count = staged.len(), "Bulk inserted appointments");
        Ok(staged)
    }

    async fn update_appointment(&mut self, id: Uuid, patch: AppointmentPatch) -> StoreResult<Appointment> {
        let appointment = self
            .tables
            .appointments
            .get_mut(&id)
            .ok_or_else(|| not_found("appointment", id))?;
        patch.apply(appointment, Utc::now());
        self.dirty = true;
        Ok(appointment.clone())
    }

    async fn delete_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<u64> {
        let before = self.tables.appointments.len();
        self.tables.appointments.retain(|_, a| !filter.matches(a));
        let deleted = (before - self.tables.appointments.len()) as u64;
        if deleted > 0 {
            self.dirty = true;
        }
        Ok(deleted)
    }

    async fn create_rule(&mut self, rule: NewRecurrenceRule) -> StoreResult<RecurrenceRule> {
        let now = Utc::now();
        let created = RecurrenceRule {
            id: Uuid::new_v4(),
            pattern: rule.pattern,
            start_date: rule.start_date,
            end_date: rule.end_date,
            time_slots: rule.time_slots,
            business_days_only: rule.business_days_only,
            created_at: now,
            updated_at: now,
        };
        self.tables.rules.insert(created.id, created.clone());
        self.dirty = true;
        Ok(created)
    }

    async fn get_rule(&mut self, id: Uuid) -> StoreResult<Option<RecurrenceRule>> {
        Ok(self.tables.rules.get(&id).cloned())
    }

    async fn update_rule(&mut self, id: Uuid, patch: RecurrenceRulePatch) -> StoreResult<RecurrenceRule> {
        let rule = self
            .tables
            .rules
            .get_mut(&id)
            .ok_or_else(|| not_found("recurrence_rule", id))?;
        patch.apply(rule, Utc::now());
        self.dirty = true;
        Ok(rule.clone())
    }

    async fn delete_rule(&mut self, id: Uuid) -> StoreResult<()> {
        if self
            .tables
            .appointments
            .values()
            .any(|a| a.recurrence_rule_id == Some(id))
        {
            return Err(StoreError::Constraint(format!(
                "recurrence rule {} is still referenced by appointments",
                id
            )));
        }
        self.tables
            .rules
            .remove(&id)
            .ok_or_else(|| not_found("recurrence_rule", id))?;
        self.dirty = true;
        Ok(())
    }

    async fn create_waitlist_entry(&mut self, entry: NewWaitlistEntry) -> StoreResult<WaitlistEntry> {
        let created = entry.into_entry(Uuid::new_v4(), Utc::now());
        self.tables.waitlist.insert(created.id, created.clone());
        self.dirty = true;
        Ok(created)
    }

    async fn find_waitlist_entries(&mut self, filter: &WaitlistFilter) -> StoreResult<Vec<WaitlistEntry>> {
        let mut entries: Vec<WaitlistEntry> = self
            .tables
            .waitlist
            .values()
            .filter(|e| filter.is_fulfilled.map_or(true, |f| e.is_fulfilled == f))
            .filter(|e| filter.client_id.map_or(true, |id| e.client_id == id))
            .filter(|e| filter.provider_id.map_or(true, |id| e.provider_id == Some(id)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn mark_waitlist_fulfilled(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<WaitlistEntry> {
        let entry = self
            .tables
            .waitlist
            .get_mut(&id)
            .ok_or_else(|| not_found("waitlist_entry", id))?;
        entry.is_fulfilled = true;
        entry.fulfilled_at = Some(at);
        self.dirty = true;
        Ok(entry.clone())
    }

    async fn create_provider_schedule(
        &mut self,
        schedule: NewProviderSchedule,
    ) -> StoreResult<ProviderSchedule> {
        let created = schedule.into_schedule(Uuid::new_v4(), Utc::now());
        self.tables.schedules.insert(created.id, created.clone());
        self.dirty = true;
        Ok(created)
    }

    async fn find_provider_schedules(
        &mut self,
        filter: &ProviderScheduleFilter,
    ) -> StoreResult<Vec<ProviderSchedule>> {
        let mut schedules: Vec<ProviderSchedule> = self
            .tables
            .schedules
            .values()
            .filter(|s| filter.provider_id.map_or(true, |id| s.provider_id == id))
            .cloned()
            .collect();
        schedules.sort_by(|a, b| {
            a.day_of_week
                .cmp(&b.day_of_week)
                .then_with(|| a.start_time.cmp(&b.start_time))
                .then(a.id.cmp(&b.id))
        });
        Ok(schedules)
    }

    async fn create_schedule_exception(
        &mut self,
        exception: NewScheduleException,
    ) -> StoreResult<ScheduleException> {
        let created = exception.into_exception(Uuid::new_v4(), Utc::now());
        self.tables.exceptions.insert(created.id, created.clone());
        self.dirty = true;
        Ok(created)
    }

    async fn find_schedule_exceptions(
        &mut self,
        provider_id: Option<Uuid>,
    ) -> StoreResult<Vec<ScheduleException>> {
        let mut exceptions: Vec<ScheduleException> = self
            .tables
            .exceptions
            .values()
            .filter(|e| provider_id.map_or(true, |id| e.provider_id == id))
            .cloned()
            .collect();
        exceptions.sort_by(|a, b| a.exception_date.cmp(&b.exception_date).then(a.id.cmp(&b.id)));
        Ok(exceptions)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction {
            base_version,
            tables,
            dirty,
            committed,
            faults,
            commits,
        } = *self;

        if FaultInjector::take(&faults.commit_conflicts) {
            return Err(StoreError::SerializationFailure(
                "injected serialization failure".to_string(),
            ));
        }
        if !dirty {
            return Ok(());
        }

        let mut current = committed.write();
        if current.version != base_version {
            return Err(StoreError::SerializationFailure(format!(
                "snapshot version {} is stale, current version is {}",
                base_version, current.version
            )));
        }
        current.tables = tables;
        current.version += 1;
        commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentDetails;

    fn booking(provider: Uuid) -> NewAppointment {
        NewAppointment::scheduled(
            Uuid::new_v4(),
            provider,
            Utc::now(),
            AppointmentDetails::new("follow_up", 30),
            provider,
        )
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemorySchedulingStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_appointment(booking(Uuid::new_v4())).await.unwrap();
        assert!(store.appointments().is_empty());

        drop(tx);
        assert!(store.appointments().is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.create_appointment(booking(Uuid::new_v4())).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.appointments().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_writer_fails_with_serialization_failure() {
        let store = InMemorySchedulingStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first.create_appointment(booking(Uuid::new_v4())).await.unwrap();
        second.create_appointment(booking(Uuid::new_v4())).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::SerializationFailure(_)));
        assert_eq!(store.appointments().len(), 1);
    }

    #[tokio::test]
    async fn test_read_only_transaction_commits_after_concurrent_write() {
        let store = InMemorySchedulingStore::new();
        let mut reader = store.begin().await.unwrap();
        let mut writer = store.begin().await.unwrap();

        writer.create_appointment(booking(Uuid::new_v4())).await.unwrap();
        writer.commit().await.unwrap();

        assert!(reader.find_appointments(&AppointmentFilter::new()).await.unwrap().is_empty());
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rule_delete_is_restricted_while_referenced() {
        let store = InMemorySchedulingStore::new();
        let mut tx = store.begin().await.unwrap();
        let rule = tx
            .create_rule(NewRecurrenceRule::new(
                crate::models::RecurrencePattern::Daily,
                Utc::now(),
                None,
                vec![crate::models::TimeSlot::daily("09:00")],
                false,
                30,
            )
            .unwrap())
            .await
            .unwrap();
        tx.create_appointment(booking(Uuid::new_v4()).in_series(rule.id))
            .await
            .unwrap();

        assert!(matches!(tx.delete_rule(rule.id).await, Err(StoreError::Constraint(_))));
        tx.delete_appointments(&AppointmentFilter::in_series(rule.id)).await.unwrap();
        tx.delete_rule(rule.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_bulk_failure_fires_once() {
        let store = InMemorySchedulingStore::new();
        store.faults().fail_bulk_inserts(1);

        let mut tx = store.begin().await.unwrap();
        let provider = Uuid::new_v4();
        assert!(tx.create_appointments(vec![booking(provider)]).await.is_err());
        assert_eq!(tx.create_appointments(vec![booking(provider)]).await.unwrap().len(), 1);
    }
}
