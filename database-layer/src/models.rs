// Database row models
use chrono::{DateTime, NaiveDate, Utc};
use scheduling_engine::{
    Appointment, AppointmentStatus, ProviderSchedule, RecurrencePattern, RecurrenceRule,
    ScheduleException, TimeSlot, WaitlistEntry,
};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::DatabaseError;

pub const APPOINTMENT_COLUMNS: &str = "id, client_id, provider_id, start_time, duration_minutes, status, \
     is_telehealth, recurrence_rule_id, appointment_type, title, description, location, room_number, \
     notes, meeting_id, join_link, created_by, created_at, updated_at, checked_in_at, completed_at, \
     cancelled_at, no_show_at";

pub const RULE_COLUMNS: &str =
    "id, pattern, start_date, end_date, time_slots, business_days_only, created_at, updated_at";

pub const WAITLIST_COLUMNS: &str = "id, client_id, provider_id, preferred_date, preferred_time_start, \
     preferred_time_end, appointment_type, notes, priority, is_fulfilled, fulfilled_at, created_at";

pub const SCHEDULE_COLUMNS: &str = "id, provider_id, day_of_week, start_time, end_time, is_available, \
     break_start_time, break_end_time, effective_from, effective_until, status, created_at";

pub const EXCEPTION_COLUMNS: &str =
    "id, provider_id, exception_date, start_time, end_time, is_unavailable, reason, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub is_telehealth: bool,
    pub recurrence_rule_id: Option<Uuid>,
    pub appointment_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub room_number: Option<String>,
    pub notes: Option<String>,
    pub meeting_id: Option<String>,
    pub join_link: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DatabaseError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<AppointmentStatus>()
            .map_err(|e| DatabaseError::InvalidRow(e.to_string()))?;
        Ok(Appointment {
            id: row.id,
            client_id: row.client_id,
            provider_id: row.provider_id,
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
            status,
            is_telehealth: row.is_telehealth,
            recurrence_rule_id: row.recurrence_rule_id,
            appointment_type: row.appointment_type,
            title: row.title,
            description: row.description,
            location: row.location,
            room_number: row.room_number,
            notes: row.notes,
            meeting_id: row.meeting_id,
            join_link: row.join_link,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            checked_in_at: row.checked_in_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            no_show_at: row.no_show_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RecurrenceRuleRow {
    pub id: Uuid,
    pub pattern: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub time_slots: Json<Vec<TimeSlot>>,
    pub business_days_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RecurrenceRuleRow> for RecurrenceRule {
    type Error = DatabaseError;

    fn try_from(row: RecurrenceRuleRow) -> Result<Self, Self::Error> {
        let pattern = row
            .pattern
            .parse::<RecurrencePattern>()
            .map_err(|e| DatabaseError::InvalidRow(e.to_string()))?;
        Ok(RecurrenceRule {
            id: row.id,
            pattern,
            start_date: row.start_date,
            end_date: row.end_date,
            time_slots: row.time_slots.0,
            business_days_only: row.business_days_only,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WaitlistRow {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub preferred_date: NaiveDate,
    pub preferred_time_start: Option<String>,
    pub preferred_time_end: Option<String>,
    pub appointment_type: String,
    pub notes: Option<String>,
    pub priority: i32,
    pub is_fulfilled: bool,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WaitlistRow> for WaitlistEntry {
    fn from(row: WaitlistRow) -> Self {
        WaitlistEntry {
            id: row.id,
            client_id: row.client_id,
            provider_id: row.provider_id,
            preferred_date: row.preferred_date,
            preferred_time_start: row.preferred_time_start,
            preferred_time_end: row.preferred_time_end,
            appointment_type: row.appointment_type,
            notes: row.notes,
            priority: row.priority,
            is_fulfilled: row.is_fulfilled,
            fulfilled_at: row.fulfilled_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ProviderScheduleRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub day_of_week: i16,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ProviderScheduleRow> for ProviderSchedule {
    type Error = DatabaseError;

    fn try_from(row: ProviderScheduleRow) -> Result<Self, Self::Error> {
        let day_of_week = u8::try_from(row.day_of_week)
            .map_err(|_| DatabaseError::InvalidRow(format!("day_of_week {}", row.day_of_week)))?;
        Ok(ProviderSchedule {
            id: row.id,
            provider_id: row.provider_id,
            day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
            is_available: row.is_available,
            break_start_time: row.break_start_time,
            break_end_time: row.break_end_time,
            effective_from: row.effective_from,
            effective_until: row.effective_until,
            status: row.status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduleExceptionRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub exception_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_unavailable: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ScheduleExceptionRow> for ScheduleException {
    fn from(row: ScheduleExceptionRow) -> Self {
        ScheduleException {
            id: row.id,
            provider_id: row.provider_id,
            exception_date: row.exception_date,
            start_time: row.start_time,
            end_time: row.end_time,
            is_unavailable: row.is_unavailable,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment_row(status: &str) -> AppointmentRow {
        let now = Utc::now();
        AppointmentRow {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            start_time: now,
            duration_minutes: 50,
            status: status.to_string(),
            is_telehealth: false,
            recurrence_rule_id: None,
            appointment_type: "therapy".to_string(),
            title: None,
            description: None,
            location: None,
            room_number: None,
            notes: None,
            meeting_id: None,
            join_link: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            checked_in_at: None,
            completed_at: None,
            cancelled_at: None,
            no_show_at: None,
        }
    }

    #[test]
    fn test_appointment_row_status_is_parsed() {
        let appointment = Appointment::try_from(appointment_row("CHECKED_IN")).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::CheckedIn);

        let err = Appointment::try_from(appointment_row("RESCHEDULED")).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidRow(_)));
    }

    #[test]
    fn test_negative_day_of_week_is_invalid() {
        let now = Utc::now();
        let row = ProviderScheduleRow {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            day_of_week: -1,
            start_time: "09:00".into(),
            end_time: "17:00".into(),
            is_available: true,
            break_start_time: None,
            break_end_time: None,
            effective_from: now,
            effective_until: None,
            status: "active".into(),
            created_at: now,
        };
        assert!(ProviderSchedule::try_from(row).is_err());
    }
}
