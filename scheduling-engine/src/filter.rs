//! Typed query filters for the persistence seam
//!
//! Each entity gets a closed filter struct so an unsupported combination is a
//! compile error rather than a field the backend silently ignores. Every set
//! field narrows the result (logical AND); `participants` is the only field
//! with OR semantics inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, TimeWindow};

/// Matches appointments where the provider OR the client is involved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub provider_id: Uuid,
    pub client_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub ids: Option<Vec<Uuid>>,
    pub participants: Option<Participants>,
    pub provider_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub recurrence_rule_id: Option<Uuid>,
    pub statuses: Option<Vec<AppointmentStatus>>,
    pub exclude_statuses: Option<Vec<AppointmentStatus>>,
    pub exclude_id: Option<Uuid>,
    pub starts_at_or_after: Option<DateTime<Utc>>,
    pub starts_at_or_before: Option<DateTime<Utc>>,
    /// `[start_time, start_time + duration)` must overlap this window
    pub overlapping: Option<TimeWindow>,
    pub appointment_type: Option<String>,
}

impl AppointmentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_ids(ids: Vec<Uuid>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn in_series(rule_id: Uuid) -> Self {
        Self {
            recurrence_rule_id: Some(rule_id),
            ..Self::default()
        }
    }

    /// Appointments that occupy a slot overlapping `window` for either participant
    pub fn blocking(participants: Participants, window: TimeWindow) -> Self {
        Self {
            participants: Some(participants),
            exclude_statuses: Some(vec![AppointmentStatus::Cancelled, AppointmentStatus::NoShow]),
            overlapping: Some(window),
            ..Self::default()
        }
    }

    pub fn starting_from(mut self, instant: DateTime<Utc>) -> Self {
        self.starts_at_or_after = Some(instant);
        self
    }

    pub fn starting_no_later_than(mut self, instant: DateTime<Utc>) -> Self {
        self.starts_at_or_before = Some(instant);
        self
    }

    pub fn excluding(mut self, id: Option<Uuid>) -> Self {
        self.exclude_id = id;
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.contains(&appointment.id) {
                return false;
            }
        }
        if let Some(participants) = self.participants {
            if appointment.provider_id != participants.provider_id
                && appointment.client_id != participants.client_id
            {
                return false;
            }
        }
        if self.provider_id.is_some_and(|id| appointment.provider_id != id) {
            return false;
        }
        if self.client_id.is_some_and(|id| appointment.client_id != id) {
            return false;
        }
        if let Some(rule_id) = self.recurrence_rule_id {
            if appointment.recurrence_rule_id != Some(rule_id) {
                return false;
            }
        }
        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&appointment.status) {
                return false;
            }
        }
        if let Some(ref excluded) = self.exclude_statuses {
            if excluded.contains(&appointment.status) {
                return false;
            }
        }
        if self.exclude_id == Some(appointment.id) {
            return false;
        }
        if self.starts_at_or_after.is_some_and(|from| appointment.start_time < from) {
            return false;
        }
        if self.starts_at_or_before.is_some_and(|until| appointment.start_time > until) {
            return false;
        }
        if let Some(window) = self.overlapping {
            if !appointment.window().overlaps(&window) {
                return false;
            }
        }
        if let Some(ref appointment_type) = self.appointment_type {
            if &appointment.appointment_type != appointment_type {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistFilter {
    pub is_fulfilled: Option<bool>,
    pub client_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
}

impl WaitlistFilter {
    pub fn open() -> Self {
        Self {
            is_fulfilled: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderScheduleFilter {
    pub provider_id: Option<Uuid>,
}
