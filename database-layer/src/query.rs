// SQL rendering of the typed scheduling filters
use chrono::Duration;
use scheduling_engine::{AppointmentFilter, AppointmentStatus, ProviderScheduleFilter, WaitlistFilter};
use sqlx::{Postgres, QueryBuilder};

use crate::models::{APPOINTMENT_COLUMNS, SCHEDULE_COLUMNS, WAITLIST_COLUMNS};

fn status_names(statuses: &[AppointmentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Append `AND ...` predicates for every set field of `filter`.
///
/// The builder must already end in a `WHERE` clause.
pub fn push_appointment_filter(builder: &mut QueryBuilder<'static, Postgres>, filter: &AppointmentFilter) {
    if let Some(ref ids) = filter.ids {
        builder.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(participants) = filter.participants {
        builder
            .push(" AND (provider_id = ")
            .push_bind(participants.provider_id)
            .push(" OR client_id = ")
            .push_bind(participants.client_id)
            .push(")");
    }
    if let Some(provider_id) = filter.provider_id {
        builder.push(" AND provider_id = ").push_bind(provider_id);
    }
    if let Some(client_id) = filter.client_id {
        builder.push(" AND client_id = ").push_bind(client_id);
    }
    if let Some(rule_id) = filter.recurrence_rule_id {
        builder.push(" AND recurrence_rule_id = ").push_bind(rule_id);
    }
    if let Some(ref statuses) = filter.statuses {
        builder
            .push(" AND status = ANY(")
            .push_bind(status_names(statuses))
            .push(")");
    }
    if let Some(ref excluded) = filter.exclude_statuses {
        builder
            .push(" AND NOT (status = ANY(")
            .push_bind(status_names(excluded))
            .push("))");
    }
    if let Some(id) = filter.exclude_id {
        builder.push(" AND id <> ").push_bind(id);
    }
    if let Some(from) = filter.starts_at_or_after {
        builder.push(" AND start_time >= ").push_bind(from);
    }
    if let Some(until) = filter.starts_at_or_before {
        builder.push(" AND start_time <= ").push_bind(until);
    }
    if let Some(window) = filter.overlapping {
        // [start, start + duration) overlaps [window.start, window.end)
        builder
            .push(" AND start_time < ")
            .push_bind(window.end)
            .push(" AND start_time + make_interval(mins => duration_minutes) > ")
            .push_bind(window.start);
        // Durations never exceed one day; gives the start_time index a lower bound
        builder
            .push(" AND start_time > ")
            .push_bind(window.start - Duration::days(1));
    }
    if let Some(ref appointment_type) = filter.appointment_type {
        builder.push(" AND appointment_type = ").push_bind(appointment_type.clone());
    }
}

pub fn select_appointments(filter: &AppointmentFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM appointments WHERE TRUE", APPOINTMENT_COLUMNS));
    push_appointment_filter(&mut builder, filter);
    builder.push(" ORDER BY start_time ASC, created_at ASC, id ASC");
    builder
}

pub fn delete_appointments(filter: &AppointmentFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("DELETE FROM appointments WHERE TRUE");
    push_appointment_filter(&mut builder, filter);
    builder
}

pub fn select_waitlist(filter: &WaitlistFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM waitlist_entries WHERE TRUE", WAITLIST_COLUMNS));
    if let Some(is_fulfilled) = filter.is_fulfilled {
        builder.push(" AND is_fulfilled = ").push_bind(is_fulfilled);
    }
    if let Some(client_id) = filter.client_id {
        builder.push(" AND client_id = ").push_bind(client_id);
    }
    if let Some(provider_id) = filter.provider_id {
        builder.push(" AND provider_id = ").push_bind(provider_id);
    }
    builder.push(" ORDER BY priority DESC, created_at ASC, id ASC");
    builder
}

pub fn select_schedules(filter: &ProviderScheduleFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM provider_schedules WHERE TRUE", SCHEDULE_COLUMNS));
    if let Some(provider_id) = filter.provider_id {
        builder.push(" AND provider_id = ").push_bind(provider_id);
    }
    builder.push(" ORDER BY day_of_week ASC, start_time ASC, id ASC");
    builder
}
