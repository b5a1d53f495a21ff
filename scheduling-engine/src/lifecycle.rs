//! Appointment lifecycle
//!
//! Every operation runs inside one serializable transaction through the
//! [`TransactionRunner`], so conflict checks and the writes they guard see
//! the same snapshot and a lost race is retried. Notifications and video
//! meetings are handled after commit and never fail an operation.

use chrono::{DateTime, Utc};
use logger_redacted::PhiRedactor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::config::SchedulingConfig;
use crate::conflict::{ConflictCheck, ConflictDetector, ConflictReport};
use crate::error::{Result, SchedulingError};
use crate::filter::AppointmentFilter;
use crate::meetings::{MeetingCoordinator, MeetingLink, MeetingRequest, VideoMeetingProvisioner};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentPatch, AppointmentQuery, AppointmentStatus,
    AppointmentUpdate, CreateAppointmentRequest, NewAppointment, NewRecurrenceRule,
    RecurrenceRule, RecurrenceRulePatch, UpdateSeriesRequest,
};
use crate::notifications::{appointment_link, NotificationDispatcher, NotificationSink};
use crate::recurrence;
use crate::rules::RecurringRuleStore;
use crate::store::{SchedulingStore, StoreTransaction};
use crate::transaction::TransactionRunner;

const APPOINTMENT_RESOURCE: &str = "appointment";

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleBooking {
    pub appointment: Appointment,
    /// Conflicts accepted by a forced booking; empty otherwise
    pub overridden: ConflictReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBooking {
    pub rule: RecurrenceRule,
    pub appointments: Vec<Appointment>,
    pub overridden: ConflictReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookingOutcome {
    Single(SingleBooking),
    Series(SeriesBooking),
}

impl BookingOutcome {
    pub fn appointments(&self) -> &[Appointment] {
        match self {
            Self::Single(booking) => std::slice::from_ref(&booking.appointment),
            Self::Series(booking) => &booking.appointments,
        }
    }

    pub fn overridden(&self) -> &ConflictReport {
        match self {
            Self::Single(booking) => &booking.overridden,
            Self::Series(booking) => &booking.overridden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesUpdate {
    pub rule: RecurrenceRule,
    /// Future instances removed at the anchor
    pub deleted: u64,
    /// Past instances left untouched
    pub preserved: usize,
    pub appointments: Vec<Appointment>,
}

// =============================================================================
// Manager
// =============================================================================

pub struct AppointmentLifecycleManager {
    runner: Arc<TransactionRunner>,
    config: SchedulingConfig,
    notifications: NotificationDispatcher,
    meetings: MeetingCoordinator,
}

impl AppointmentLifecycleManager {
    pub fn new(store: Arc<dyn SchedulingStore>, config: SchedulingConfig) -> Self {
        let runner = Arc::new(TransactionRunner::new(store, config.transaction.clone()));
        Self::with_runner(runner, config)
    }

    pub fn with_runner(runner: Arc<TransactionRunner>, config: SchedulingConfig) -> Self {
        let timeout = config.collaborator_timeout();
        let unread_counts = Arc::new(TtlCache::new(config.notification_cache_ttl()));
        Self {
            runner,
            notifications: NotificationDispatcher::new(None, unread_counts, timeout),
            meetings: MeetingCoordinator::new(None, timeout),
            config,
        }
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = self.notifications.with_sink(sink);
        self
    }

    pub fn with_notification_cache(mut self, unread_counts: Arc<TtlCache<Uuid, u64>>) -> Self {
        self.notifications = self.notifications.with_unread_cache(unread_counts);
        self
    }

    pub fn with_meeting_provisioner(mut self, provisioner: Arc<dyn VideoMeetingProvisioner>) -> Self {
        self.meetings = self.meetings.with_provisioner(provisioner);
        self
    }

    pub fn with_redactor(mut self, redactor: PhiRedactor) -> Self {
        self.notifications = self.notifications.with_redactor(redactor.clone());
        self.meetings = self.meetings.with_redactor(redactor);
        self
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Book a single appointment, or a whole series when the request carries
    /// a recurrence with at least one time slot.
    pub async fn create_appointment(
        &self,
        request: &CreateAppointmentRequest,
        actor: Uuid,
    ) -> Result<BookingOutcome> {
        match request.recurrence {
            Some(ref recurrence) if !recurrence.time_slots.is_empty() => {
                self.create_recurring(request, actor).await.map(BookingOutcome::Series)
            }
            _ => self.create_single(request, actor).await.map(BookingOutcome::Single),
        }
    }

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn create_single(&self, request: &CreateAppointmentRequest, actor: Uuid) -> Result<SingleBooking> {
        request.details.validate()?;
        let provider_id = request.resolved_provider(actor);
        let check = ConflictCheck::for_duration(
            provider_id,
            request.client_id,
            request.start_time,
            request.details.duration_minutes,
        )?;

        let booking = self
            .runner
            .run("create_single", move |mut tx| async move {
                let result = book_single(tx.as_mut(), request, &check, provider_id, actor).await;
                (tx, result)
            })
            .await?;

        if booking.overridden.has_conflicts() {
            warn!(
                appointment_id = %booking.appointment.id,
                conflicts = booking.overridden.conflicts.len(),
                "Appointment booked despite conflicts"
            );
        }
        info!(
            appointment_id = %booking.appointment.id,
            provider_id = %provider_id,
            start_time = %booking.appointment.start_time,
            "Appointment scheduled"
        );

        let mut appointments = self.attach_meeting(vec![booking.appointment.clone()]).await;
        let appointment = appointments.pop().unwrap_or(booking.appointment);
        self.notify(
            &appointment,
            format!("New appointment scheduled for {}", appointment.start_time.format("%Y-%m-%d %H:%M UTC")),
        );

        Ok(SingleBooking {
            appointment,
            overridden: booking.overridden,
        })
    }

    /// Persist the rule, expand it and bulk-insert the instances in one transaction.
    ///
    /// A rule that expands to no instances is rejected so every stored series
    /// has at least one appointment to carry its details forward on edit.
    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn create_recurring(&self, request: &CreateAppointmentRequest, actor: Uuid) -> Result<SeriesBooking> {
        let recurrence = request
            .recurrence
            .as_ref()
            .ok_or_else(|| SchedulingError::validation("Recurring appointment requires a recurrence"))?;
        if recurrence.time_slots.is_empty() {
            return Err(SchedulingError::validation(
                "Recurring appointment requires at least one time slot",
            ));
        }
        request.details.validate()?;

        let provider_id = request.resolved_provider(actor);
        let rule = NewRecurrenceRule::new(
            recurrence.pattern,
            request.start_time,
            recurrence.end_date,
            recurrence.time_slots.clone(),
            recurrence.business_days_only,
            self.config.default_horizon_days,
        )?;
        let check_each = !self.config.skip_conflict_check_for_series;

        let series = self
            .runner
            .run("create_recurring", move |mut tx| {
                let rule = rule.clone();
                async move {
                    let result = book_series(tx.as_mut(), request, rule, provider_id, actor, check_each).await;
                    (tx, result)
                }
            })
            .await?;

        if series.overridden.has_conflicts() {
            warn!(
                rule_id = %series.rule.id,
                conflicts = series.overridden.conflicts.len(),
                "Recurring series booked despite conflicts"
            );
        }
        info!(
            rule_id = %series.rule.id,
            pattern = %series.rule.pattern,
            instances = series.appointments.len(),
            "Recurring series scheduled"
        );

        let appointments = self.attach_meeting(series.appointments).await;
        if let Some(first) = appointments.first() {
            self.notify(
                first,
                format!(
                    "{} recurring appointments scheduled starting {}",
                    appointments.len(),
                    first.start_time.format("%Y-%m-%d %H:%M UTC")
                ),
            );
        }

        Ok(SeriesBooking {
            rule: series.rule,
            appointments,
            overridden: series.overridden,
        })
    }

    // =========================================================================
    // Series edits
    // =========================================================================

    /// Rewrite a series from `request.anchor` on.
    ///
    /// Instances before the anchor are kept as they are. The rule is updated
    /// in place, instances at or after the anchor are deleted and regenerated
    /// from the new rule. Descriptive fields come from the first instance at
    /// or after the anchor (or the last earlier one) overlaid with
    /// `request.overrides`. An edit that would leave the series with no
    /// instances at all fails with `Validation`.
    #[instrument(skip(self, request))]
    pub async fn update_series(
        &self,
        rule_id: Uuid,
        request: &UpdateSeriesRequest,
        actor: Uuid,
    ) -> Result<SeriesUpdate> {
        if request.time_slots.is_empty() {
            return Err(SchedulingError::validation(
                "Recurring series requires at least one time slot",
            ));
        }
        for slot in &request.time_slots {
            recurrence::parse_time_of_day(&slot.time)?;
        }
        let check_each = !self.config.skip_conflict_check_for_series;

        let update = self
            .runner
            .run("update_series", move |mut tx| async move {
                let result = regenerate_series(tx.as_mut(), rule_id, request, actor, check_each).await;
                (tx, result)
            })
            .await?;

        info!(
            rule_id = %rule_id,
            deleted = update.deleted,
            preserved = update.preserved,
            regenerated = update.appointments.len(),
            "Recurring series updated"
        );

        let appointments = if update.appointments.iter().all(|a| a.join_link.is_some()) {
            update.appointments
        } else {
            self.attach_meeting(update.appointments).await
        };
        if let Some(first) = appointments.first() {
            self.notify(
                first,
                format!("Recurring series updated: {} upcoming appointments", appointments.len()),
            );
        }

        Ok(SeriesUpdate {
            appointments,
            ..update
        })
    }

    /// Remove every instance of a series, then the rule itself
    #[instrument(skip(self))]
    pub async fn delete_series(&self, rule_id: Uuid, actor: Uuid) -> Result<u64> {
        let deleted = self
            .runner
            .run("delete_series", move |mut tx| async move {
                let result = remove_series(tx.as_mut(), rule_id).await;
                (tx, result)
            })
            .await?;

        info!(rule_id = %rule_id, deleted, "Recurring series deleted");
        Ok(deleted)
    }

    // =========================================================================
    // Single appointment changes
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn update_status(&self, id: Uuid, status: AppointmentStatus, actor: Uuid) -> Result<Appointment> {
        let appointment = self
            .runner
            .run("update_status", move |mut tx| async move {
                let result = transition(tx.as_mut(), id, status).await;
                (tx, result)
            })
            .await?;

        info!(appointment_id = %id, status = %status, "Appointment status updated");
        self.notify(&appointment, format!("Appointment status changed to {}", status));
        Ok(appointment)
    }

    /// Edit descriptive fields, reschedule, or change status.
    ///
    /// A new start time or duration is re-checked for conflicts, ignoring the
    /// appointment being moved.
    #[instrument(skip(self, update))]
    pub async fn update_appointment(
        &self,
        id: Uuid,
        update: &AppointmentUpdate,
        actor: Uuid,
    ) -> Result<Appointment> {
        let appointment = self
            .runner
            .run("update_appointment", move |mut tx| async move {
                let result = apply_update(tx.as_mut(), id, update).await;
                (tx, result)
            })
            .await?;

        info!(appointment_id = %id, "Appointment updated");
        self.notify(&appointment, "Appointment updated".to_string());
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub async fn remove_appointment(&self, id: Uuid, actor: Uuid) -> Result<()> {
        self.runner
            .run("remove_appointment", move |mut tx| async move {
                let result = remove_one(tx.as_mut(), id).await;
                (tx, result)
            })
            .await?;

        info!(appointment_id = %id, "Appointment removed");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_appointment(&self, id: Uuid) -> Result<Appointment> {
        self.runner
            .run("get_appointment", move |mut tx| async move {
                let result = fetch(tx.as_mut(), id).await;
                (tx, result)
            })
            .await
    }

    /// Appointments matching `query`, ordered by start time
    pub async fn list_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>> {
        let filter = AppointmentFilter {
            client_id: query.client_id,
            provider_id: query.provider_id,
            statuses: query.status.map(|status| vec![status]),
            appointment_type: query.appointment_type.clone(),
            starts_at_or_after: query.start_date,
            starts_at_or_before: query.end_date,
            ..AppointmentFilter::default()
        };
        let filter = &filter;

        let appointments = self
            .runner
            .run("list_appointments", move |mut tx| async move {
                let result = tx.find_appointments(filter).await.map_err(SchedulingError::from);
                (tx, result)
            })
            .await?;

        Ok(appointments
            .into_iter()
            .filter(|appointment| query.matches_search(appointment))
            .collect())
    }

    pub async fn recurrence_rule(&self, rule_id: Uuid) -> Result<RecurrenceRule> {
        self.runner
            .run("recurrence_rule", move |mut tx| async move {
                let result = RecurringRuleStore::get(tx.as_mut(), rule_id).await;
                (tx, result)
            })
            .await
    }

    /// Stand-alone conflict query, e.g. for a booking form preview
    pub async fn check_conflicts(&self, check: &ConflictCheck) -> Result<ConflictReport> {
        self.runner
            .run("check_conflicts", move |mut tx| async move {
                let result = ConflictDetector::find_conflicts(tx.as_mut(), check).await;
                (tx, result)
            })
            .await
    }

    // =========================================================================
    // Post-commit side effects
    // =========================================================================

    fn notify(&self, appointment: &Appointment, message: String) {
        self.notifications
            .dispatch(appointment.provider_id, message, appointment_link(appointment.id));
    }

    /// Provision one meeting for telehealth appointments and attach it to
    /// all of them. Any failure leaves the appointments without a link.
    async fn attach_meeting(&self, appointments: Vec<Appointment>) -> Vec<Appointment> {
        let Some(first) = appointments.first() else {
            return appointments;
        };
        if !first.is_telehealth {
            return appointments;
        }
        let Some(link) = self.meetings.provision(&MeetingRequest::from(first)).await else {
            return appointments;
        };

        let ids: Vec<Uuid> = appointments.iter().map(|a| a.id).collect();
        let (ids, link) = (&ids, &link);
        let attached = self
            .runner
            .run("attach_meeting", move |mut tx| async move {
                let result = attach_link(tx.as_mut(), ids, link).await;
                (tx, result)
            })
            .await;

        match attached {
            Ok(updated) => updated,
            Err(error) => {
                warn!(error = %error, "Failed to attach meeting link");
                appointments
            }
        }
    }
}

// =============================================================================
// Transaction bodies
// =============================================================================

async fn fetch(tx: &mut dyn StoreTransaction, id: Uuid) -> Result<Appointment> {
    tx.get_appointment(id)
        .await?
        .ok_or_else(|| SchedulingError::not_found(APPOINTMENT_RESOURCE, id))
}

async fn book_single(
    tx: &mut dyn StoreTransaction,
    request: &CreateAppointmentRequest,
    check: &ConflictCheck,
    provider_id: Uuid,
    actor: Uuid,
) -> Result<SingleBooking> {
    let report = ConflictDetector::find_conflicts(tx, check).await?;
    if report.has_conflicts() && !request.force {
        return Err(SchedulingError::Conflict { report });
    }

    let appointment = tx
        .create_appointment(NewAppointment::scheduled(
            request.client_id,
            provider_id,
            request.start_time,
            request.details.clone(),
            actor,
        ))
        .await?;
    Ok(SingleBooking {
        appointment,
        overridden: report,
    })
}

async fn book_series(
    tx: &mut dyn StoreTransaction,
    request: &CreateAppointmentRequest,
    rule: NewRecurrenceRule,
    provider_id: Uuid,
    actor: Uuid,
    check_each: bool,
) -> Result<SeriesBooking> {
    let rule = RecurringRuleStore::create(tx, rule).await?;
    let dates = recurrence::expand_rule(&rule, rule.start_date)?;
    if dates.is_empty() {
        return Err(SchedulingError::validation(format!(
            "Recurrence produces no appointments between {} and {}",
            rule.start_date, rule.end_date
        )));
    }

    let overridden = if check_each {
        series_conflicts(tx, provider_id, request.client_id, &dates, request.details.duration_minutes).await?
    } else {
        ConflictReport::default()
    };
    if overridden.has_conflicts() && !request.force {
        return Err(SchedulingError::Conflict { report: overridden });
    }

    let batch = series_batch(&dates, request.client_id, provider_id, &request.details, None, rule.id, actor);
    let appointments = insert_batch(tx, batch).await?;
    Ok(SeriesBooking {
        rule,
        appointments,
        overridden,
    })
}

async fn regenerate_series(
    tx: &mut dyn StoreTransaction,
    rule_id: Uuid,
    request: &UpdateSeriesRequest,
    actor: Uuid,
    check_each: bool,
) -> Result<SeriesUpdate> {
    let existing = RecurringRuleStore::get(tx, rule_id).await?;
    let horizon = request.end_date.unwrap_or(existing.end_date);
    if horizon < existing.start_date {
        return Err(SchedulingError::validation(format!(
            "Recurrence end date {} is before start date {}",
            horizon, existing.start_date
        )));
    }

    let instances = tx.find_appointments(&AppointmentFilter::in_series(rule_id)).await?;
    let template = instances
        .iter()
        .find(|a| a.start_time >= request.anchor)
        .or_else(|| instances.last())
        .cloned()
        .ok_or_else(|| {
            SchedulingError::validation(format!(
                "Recurring series {} has no appointments to carry forward",
                rule_id
            ))
        })?;
    let preserved = instances.iter().filter(|a| a.start_time < request.anchor).count();

    let details = template.details().merged(&request.overrides);
    details.validate()?;
    let meeting = match (&template.meeting_id, &template.join_link) {
        (Some(meeting_id), Some(join_link)) if details.is_telehealth => Some(MeetingLink {
            meeting_id: meeting_id.clone(),
            join_link: join_link.clone(),
        }),
        _ => None,
    };

    let rule = RecurringRuleStore::update(
        tx,
        rule_id,
        RecurrenceRulePatch {
            pattern: Some(request.pattern),
            end_date: Some(horizon),
            time_slots: Some(request.time_slots.clone()),
            business_days_only: Some(request.business_days_only),
        },
    )
    .await?;

    let deleted = tx
        .delete_appointments(&AppointmentFilter::in_series(rule_id).starting_from(request.anchor))
        .await?;

    let dates = recurrence::expand_rule(&rule, request.anchor)?;
    if dates.is_empty() && preserved == 0 {
        return Err(SchedulingError::validation(format!(
            "Recurring series {} would be left without appointments",
            rule_id
        )));
    }
    if check_each {
        let report = series_conflicts(
            tx,
            template.provider_id,
            template.client_id,
            &dates,
            details.duration_minutes,
        )
        .await?;
        if report.has_conflicts() {
            return Err(SchedulingError::Conflict { report });
        }
    }

    let batch = series_batch(
        &dates,
        template.client_id,
        template.provider_id,
        &details,
        meeting.as_ref(),
        rule_id,
        actor,
    );
    let appointments = insert_batch(tx, batch).await?;

    Ok(SeriesUpdate {
        rule,
        deleted,
        preserved,
        appointments,
    })
}

async fn series_conflicts(
    tx: &mut dyn StoreTransaction,
    provider_id: Uuid,
    client_id: Uuid,
    dates: &[DateTime<Utc>],
    duration_minutes: i32,
) -> Result<ConflictReport> {
    let mut report = ConflictReport::default();
    for start in dates {
        let check = ConflictCheck::for_duration(provider_id, client_id, *start, duration_minutes)?;
        report.extend(ConflictDetector::find_conflicts(tx, &check).await?);
    }
    Ok(report)
}

fn series_batch(
    dates: &[DateTime<Utc>],
    client_id: Uuid,
    provider_id: Uuid,
    details: &AppointmentDetails,
    meeting: Option<&MeetingLink>,
    rule_id: Uuid,
    actor: Uuid,
) -> Vec<NewAppointment> {
    dates
        .iter()
        .map(|start| {
            let mut appointment =
                NewAppointment::scheduled(client_id, provider_id, *start, details.clone(), actor).in_series(rule_id);
            if let Some(link) = meeting {
                appointment.meeting_id = Some(link.meeting_id.clone());
                appointment.join_link = Some(link.join_link.clone());
            }
            appointment
        })
        .collect()
}

async fn insert_batch(tx: &mut dyn StoreTransaction, batch: Vec<NewAppointment>) -> Result<Vec<Appointment>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    Ok(tx.create_appointments(batch).await?)
}

async fn remove_series(tx: &mut dyn StoreTransaction, rule_id: Uuid) -> Result<u64> {
    RecurringRuleStore::get(tx, rule_id).await?;
    let deleted = tx.delete_appointments(&AppointmentFilter::in_series(rule_id)).await?;
    RecurringRuleStore::delete(tx, rule_id).await?;
    Ok(deleted)
}

async fn transition(tx: &mut dyn StoreTransaction, id: Uuid, status: AppointmentStatus) -> Result<Appointment> {
    let current = fetch(tx, id).await?;
    if !current.status.can_transition_to(status) {
        return Err(SchedulingError::InvalidStateTransition {
            from: current.status,
            to: status,
        });
    }
    Ok(tx
        .update_appointment(id, AppointmentPatch::status_change(status, Utc::now()))
        .await?)
}

async fn apply_update(tx: &mut dyn StoreTransaction, id: Uuid, update: &AppointmentUpdate) -> Result<Appointment> {
    let current = fetch(tx, id).await?;

    let mut patch = match update.status {
        Some(status) if status != current.status => {
            if !current.status.can_transition_to(status) {
                return Err(SchedulingError::InvalidStateTransition {
                    from: current.status,
                    to: status,
                });
            }
            AppointmentPatch::status_change(status, Utc::now())
        }
        _ => AppointmentPatch::default(),
    };

    let details = current.details().merged(&update.details);
    details.validate()?;
    let start_time = update.start_time.unwrap_or(current.start_time);
    let moved = start_time != current.start_time || details.duration_minutes != current.duration_minutes;

    if moved {
        if current.status.is_terminal() {
            return Err(SchedulingError::validation(format!(
                "Cannot reschedule a {} appointment",
                current.status
            )));
        }
        if patch.status.unwrap_or(current.status).occupies_slot() {
            let check = ConflictCheck::for_duration(
                current.provider_id,
                current.client_id,
                start_time,
                details.duration_minutes,
            )?
            .excluding(id);
            let report = ConflictDetector::find_conflicts(tx, &check).await?;
            if report.has_conflicts() {
                return Err(SchedulingError::Conflict { report });
            }
        }
    }

    patch.start_time = update.start_time;
    patch.details = update.details.clone();
    Ok(tx.update_appointment(id, patch).await?)
}

async fn remove_one(tx: &mut dyn StoreTransaction, id: Uuid) -> Result<()> {
    fetch(tx, id).await?;
    tx.delete_appointments(&AppointmentFilter::by_ids(vec![id])).await?;
    Ok(())
}

async fn attach_link(tx: &mut dyn StoreTransaction, ids: &[Uuid], link: &MeetingLink) -> Result<Vec<Appointment>> {
    let mut updated = Vec::with_capacity(ids.len());
    for id in ids {
        updated.push(
            tx.update_appointment(*id, AppointmentPatch::meeting(link.meeting_id.clone(), link.join_link.clone()))
                .await?,
        );
    }
    Ok(updated)
}
