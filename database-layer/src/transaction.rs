// Serializable PostgreSQL transactions behind the scheduling store traits
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduling_engine::{
    Appointment, AppointmentFilter, AppointmentPatch, NewAppointment, NewProviderSchedule,
    NewRecurrenceRule, NewScheduleException, NewWaitlistEntry, ProviderSchedule,
    ProviderScheduleFilter, RecurrenceRule, RecurrenceRulePatch, ScheduleException,
    SchedulingStore, StoreError, StoreResult, StoreTransaction, WaitlistEntry, WaitlistFilter,
};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::error::classify;
use crate::models::{
    AppointmentRow, ProviderScheduleRow, RecurrenceRuleRow, ScheduleExceptionRow, WaitlistRow,
    APPOINTMENT_COLUMNS, EXCEPTION_COLUMNS, RULE_COLUMNS, WAITLIST_COLUMNS,
};
use crate::query;

/// Rows per INSERT statement; 19 binds per row stays under the 65535 parameter limit
const BULK_INSERT_CHUNK: usize = 1000;

/// Scheduling store on PostgreSQL
#[derive(Clone)]
pub struct PgSchedulingStore {
    pool: DatabasePool,
}

impl PgSchedulingStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

#[async_trait]
impl SchedulingStore for PgSchedulingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        debug!("Beginning serializable transaction");

        let mut tx = self.pool.pool().begin().await.map_err(classify)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn into_appointments(rows: Vec<AppointmentRow>) -> StoreResult<Vec<Appointment>> {
    rows.into_iter()
        .map(|row| Appointment::try_from(row).map_err(StoreError::from))
        .collect()
}

fn not_found(resource: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { resource, id }
}

impl PgTransaction {
    async fn lock_appointment(&mut self, id: Uuid) -> StoreResult<Appointment> {
        let sql = format!("SELECT {} FROM appointments WHERE id = $1 FOR UPDATE", APPOINTMENT_COLUMNS);
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| not_found("appointment", id))?;
        Ok(Appointment::try_from(row)?)
    }

    async fn lock_rule(&mut self, id: Uuid) -> StoreResult<RecurrenceRule> {
        let sql = format!("SELECT {} FROM recurrence_rules WHERE id = $1 FOR UPDATE", RULE_COLUMNS);
        let row = sqlx::query_as::<_, RecurrenceRuleRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| not_found("recurrence_rule", id))?;
        Ok(RecurrenceRule::try_from(row)?)
    }

    async fn insert_appointments(&mut self, batch: Vec<NewAppointment>) -> StoreResult<Vec<Appointment>> {
        let now = Utc::now();
        let appointments: Vec<Appointment> = batch
            .into_iter()
            .map(|appointment| appointment.into_appointment(Uuid::new_v4(), now))
            .collect();

        for chunk in appointments.chunks(BULK_INSERT_CHUNK) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO appointments (id, client_id, provider_id, start_time, duration_minutes, status, \
                 is_telehealth, recurrence_rule_id, appointment_type, title, description, location, \
                 room_number, notes, meeting_id, join_link, created_by, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, a| {
                row.push_bind(a.id)
                    .push_bind(a.client_id)
                    .push_bind(a.provider_id)
                    .push_bind(a.start_time)
                    .push_bind(a.duration_minutes)
                    .push_bind(a.status.as_str())
                    .push_bind(a.is_telehealth)
                    .push_bind(a.recurrence_rule_id)
                    .push_bind(a.appointment_type.clone())
                    .push_bind(a.title.clone())
                    .push_bind(a.description.clone())
                    .push_bind(a.location.clone())
                    .push_bind(a.room_number.clone())
                    .push_bind(a.notes.clone())
                    .push_bind(a.meeting_id.clone())
                    .push_bind(a.join_link.clone())
                    .push_bind(a.created_by)
                    .push_bind(a.created_at)
                    .push_bind(a.updated_at);
            });
            builder.build().execute(&mut *self.tx).await.map_err(classify)?;
        }

        debug!(count = appointments.len(), "Inserted appointments");
        Ok(appointments)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn find_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        let mut select = query::select_appointments(filter);
        let rows = select
            .build_query_as::<AppointmentRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;
        into_appointments(rows)
    }

    async fn get_appointment(&mut self, id: Uuid) -> StoreResult<Option<Appointment>> {
        let sql = format!("SELECT {} FROM appointments WHERE id = $1", APPOINTMENT_COLUMNS);
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(row.map(Appointment::try_from).transpose()?)
    }

    async fn create_appointment(&mut self, appointment: NewAppointment) -> StoreResult<Appointment> {
        self.insert_appointments(vec![appointment])
            .await?
            .pop()
            .ok_or_else(|| StoreError::Backend("insert returned no appointment".to_string()))
    }

    async fn create_appointments(&mut self, appointments: Vec<NewAppointment>) -> StoreResult<Vec<Appointment>> {
        self.insert_appointments(appointments).await
    }

    async fn update_appointment(&mut self, id: Uuid, patch: AppointmentPatch) -> StoreResult<Appointment> {
        let mut appointment = self.lock_appointment(id).await?;
        patch.apply(&mut appointment, Utc::now());

        sqlx::query(
            r#"
            UPDATE appointments SET
                start_time = $2, duration_minutes = $3, status = $4, is_telehealth = $5,
                appointment_type = $6, title = $7, description = $8, location = $9,
                room_number = $10, notes = $11, meeting_id = $12, join_link = $13,
                updated_at = $14, checked_in_at = $15, completed_at = $16,
                cancelled_at = $17, no_show_at = $18
            WHERE id = $1
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.start_time)
        .bind(appointment.duration_minutes)
        .bind(appointment.status.as_str())
        .bind(appointment.is_telehealth)
        .bind(&appointment.appointment_type)
        .bind(&appointment.title)
        .bind(&appointment.description)
        .bind(&appointment.location)
        .bind(&appointment.room_number)
        .bind(&appointment.notes)
        .bind(&appointment.meeting_id)
        .bind(&appointment.join_link)
        .bind(appointment.updated_at)
        .bind(appointment.checked_in_at)
        .bind(appointment.completed_at)
        .bind(appointment.cancelled_at)
        .bind(appointment.no_show_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(appointment)
    }

    async fn delete_appointments(&mut self, filter: &AppointmentFilter) -> StoreResult<u64> {
        let mut delete = query::delete_appointments(filter);
        let result = delete.build().execute(&mut *self.tx).await.map_err(classify)?;
        debug!(deleted = result.rows_affected(), "Deleted appointments");
        Ok(result.rows_affected())
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

        sqlx::query(
            r#"
            INSERT INTO recurrence_rules
                (id, pattern, start_date, end_date, time_slots, business_days_only, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(created.id)
        .bind(created.pattern.as_str())
        .bind(created.start_date)
        .bind(created.end_date)
        .bind(Json(&created.time_slots))
        .bind(created.business_days_only)
        .bind(created.created_at)
        .bind(created.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(created)
    }

    async fn get_rule(&mut self, id: Uuid) -> StoreResult<Option<RecurrenceRule>> {
        let sql = format!("SELECT {} FROM recurrence_rules WHERE id = $1", RULE_COLUMNS);
        let row = sqlx::query_as::<_, RecurrenceRuleRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(row.map(RecurrenceRule::try_from).transpose()?)
    }

    async fn update_rule(&mut self, id: Uuid, patch: RecurrenceRulePatch) -> StoreResult<RecurrenceRule> {
        let mut rule = self.lock_rule(id).await?;
        patch.apply(&mut rule, Utc::now());

        sqlx::query(
            r#"
            UPDATE recurrence_rules SET
                pattern = $2, end_date = $3, time_slots = $4, business_days_only = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(rule.pattern.as_str())
        .bind(rule.end_date)
        .bind(Json(&rule.time_slots))
        .bind(rule.business_days_only)
        .bind(rule.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(rule)
    }

    async fn delete_rule(&mut self, id: Uuid) -> StoreResult<()> {
        // ON DELETE RESTRICT rejects a rule that appointments still reference
        let result = sqlx::query("DELETE FROM recurrence_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(not_found("recurrence_rule", id));
        }
        Ok(())
    }

    async fn create_waitlist_entry(&mut self, entry: NewWaitlistEntry) -> StoreResult<WaitlistEntry> {
        let created = entry.into_entry(Uuid::new_v4(), Utc::now());

        sqlx::query(
            r#"
            INSERT INTO waitlist_entries
                (id, client_id, provider_id, preferred_date, preferred_time_start, preferred_time_end,
                 appointment_type, notes, priority, is_fulfilled, fulfilled_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(created.id)
        .bind(created.client_id)
        .bind(created.provider_id)
        .bind(created.preferred_date)
        .bind(&created.preferred_time_start)
        .bind(&created.preferred_time_end)
        .bind(&created.appointment_type)
        .bind(&created.notes)
        .bind(created.priority)
        .bind(created.is_fulfilled)
        .bind(created.fulfilled_at)
        .bind(created.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(created)
    }

    async fn find_waitlist_entries(&mut self, filter: &WaitlistFilter) -> StoreResult<Vec<WaitlistEntry>> {
        let mut select = query::select_waitlist(filter);
        let rows = select
            .build_query_as::<WaitlistRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(WaitlistEntry::from).collect())
    }

    async fn mark_waitlist_fulfilled(&mut self, id: Uuid, at: DateTime<Utc>) -> StoreResult<WaitlistEntry> {
        let sql = format!(
            "UPDATE waitlist_entries SET is_fulfilled = TRUE, fulfilled_at = $2 WHERE id = $1 RETURNING {}",
            WAITLIST_COLUMNS
        );
        let row = sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| not_found("waitlist_entry", id))?;
        Ok(row.into())
    }

    async fn create_provider_schedule(&mut self, schedule: NewProviderSchedule) -> StoreResult<ProviderSchedule> {
        let created = schedule.into_schedule(Uuid::new_v4(), Utc::now());

        sqlx::query(
            r#"
            INSERT INTO provider_schedules
                (id, provider_id, day_of_week, start_time, end_time, is_available, break_start_time,
                 break_end_time, effective_from, effective_until, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(created.id)
        .bind(created.provider_id)
        .bind(i16::from(created.day_of_week))
        .bind(&created.start_time)
        .bind(&created.end_time)
        .bind(created.is_available)
        .bind(&created.break_start_time)
        .bind(&created.break_end_time)
        .bind(created.effective_from)
        .bind(created.effective_until)
        .bind(&created.status)
        .bind(created.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(created)
    }

    async fn find_provider_schedules(&mut self, filter: &ProviderScheduleFilter) -> StoreResult<Vec<ProviderSchedule>> {
        let mut select = query::select_schedules(filter);
        let rows = select
            .build_query_as::<ProviderScheduleRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;
        rows.into_iter()
            .map(|row| ProviderSchedule::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn create_schedule_exception(&mut self, exception: NewScheduleException) -> StoreResult<ScheduleException> {
        let created = exception.into_exception(Uuid::new_v4(), Utc::now());

        sqlx::query(
            r#"
            INSERT INTO schedule_exceptions
                (id, provider_id, exception_date, start_time, end_time, is_unavailable, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(created.id)
        .bind(created.provider_id)
        .bind(created.exception_date)
        .bind(&created.start_time)
        .bind(&created.end_time)
        .bind(created.is_unavailable)
        .bind(&created.reason)
        .bind(created.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(created)
    }

    async fn find_schedule_exceptions(&mut self, provider_id: Option<Uuid>) -> StoreResult<Vec<ScheduleException>> {
        let sql = format!(
            "SELECT {} FROM schedule_exceptions WHERE ($1::uuid IS NULL OR provider_id = $1) \
             ORDER BY exception_date ASC, id ASC",
            EXCEPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ScheduleExceptionRow>(&sql)
            .bind(provider_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(ScheduleException::from).collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
