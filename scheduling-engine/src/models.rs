use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SchedulingError;

// =============================================================================
// Recurrence
// =============================================================================

/// How often a recurring series repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrencePattern {
    type Err = SchedulingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "MONTHLY" => Ok(Self::Monthly),
            "YEARLY" => Ok(Self::Yearly),
            other => Err(SchedulingError::validation(format!(
                "Invalid recurrence pattern: '{}'. Must be one of: DAILY, WEEKLY, MONTHLY, YEARLY",
                other
            ))),
        }
    }
}

/// Partial date specification expanded by the recurrence generator.
///
/// Which fields are meaningful depends on the pattern: `day_of_week` for
/// weekly series (0 = Sunday .. 6 = Saturday), `day_of_month` for monthly,
/// `month` (1-12) plus `day_of_month` for yearly. `time` is always "HH:MM".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u8>,
    pub time: String,
}

impl TimeSlot {
    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            day_of_week: None,
            day_of_month: None,
            month: None,
            time: time.into(),
        }
    }

    pub fn weekly(day_of_week: u8, time: impl Into<String>) -> Self {
        Self {
            day_of_week: Some(day_of_week),
            ..Self::daily(time)
        }
    }

    pub fn monthly(day_of_month: u8, time: impl Into<String>) -> Self {
        Self {
            day_of_month: Some(day_of_month),
            ..Self::daily(time)
        }
    }

    pub fn yearly(month: u8, day_of_month: u8, time: impl Into<String>) -> Self {
        Self {
            month: Some(month),
            day_of_month: Some(day_of_month),
            ..Self::daily(time)
        }
    }
}

/// Persisted definition of a repeating schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub id: Uuid,
    pub pattern: RecurrencePattern,
    pub start_date: DateTime<Utc>,
    /// Horizon: no instance is generated after this instant
    pub end_date: DateTime<Utc>,
    pub time_slots: Vec<TimeSlot>,
    pub business_days_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecurrenceRule {
    pub pattern: RecurrencePattern,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub time_slots: Vec<TimeSlot>,
    pub business_days_only: bool,
}

impl NewRecurrenceRule {
    /// Build a rule, defaulting the horizon to `start_date + default_horizon_days`.
    pub fn new(
        pattern: RecurrencePattern,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        time_slots: Vec<TimeSlot>,
        business_days_only: bool,
        default_horizon_days: i64,
    ) -> Result<Self, SchedulingError> {
        let end_date = match end_date {
            Some(end_date) => end_date,
            None => Duration::try_days(default_horizon_days)
                .and_then(|horizon| start_date.checked_add_signed(horizon))
                .ok_or_else(|| {
                    SchedulingError::validation(format!(
                        "Default horizon of {} days from {} is out of range",
                        default_horizon_days, start_date
                    ))
                })?,
        };
        Ok(Self {
            pattern,
            start_date,
            end_date,
            time_slots,
            business_days_only,
        })
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.end_date < self.start_date {
            return Err(SchedulingError::validation(format!(
                "Recurrence end date {} is before start date {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }
}

/// In-place mutation of a recurrence rule when a series is edited
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRulePatch {
    pub pattern: Option<RecurrencePattern>,
    pub end_date: Option<DateTime<Utc>>,
    pub time_slots: Option<Vec<TimeSlot>>,
    pub business_days_only: Option<bool>,
}

impl RecurrenceRulePatch {
    pub fn apply(self, rule: &mut RecurrenceRule, now: DateTime<Utc>) {
        if let Some(pattern) = self.pattern {
            rule.pattern = pattern;
        }
        if let Some(end_date) = self.end_date {
            rule.end_date = end_date;
        }
        if let Some(time_slots) = self.time_slots {
            rule.time_slots = time_slots;
        }
        if let Some(business_days_only) = self.business_days_only {
            rule.business_days_only = business_days_only;
        }
        rule.updated_at = now;
    }
}

// =============================================================================
// Appointments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::CheckedIn => "CHECKED_IN",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoShow => "NO_SHOW",
        }
    }

    /// Statuses reachable from this one. Terminal statuses return an empty slice.
    pub fn allowed_transitions(&self) -> &'static [AppointmentStatus] {
        match self {
            Self::Scheduled => &[
                Self::Completed,
                Self::Cancelled,
                Self::NoShow,
                Self::CheckedIn,
            ],
            Self::CheckedIn => &[Self::Completed, Self::Cancelled, Self::NoShow],
            Self::Completed | Self::Cancelled | Self::NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether an appointment in this status occupies its time slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = SchedulingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(Self::Scheduled),
            "CHECKED_IN" => Ok(Self::CheckedIn),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "NO_SHOW" => Ok(Self::NoShow),
            other => Err(SchedulingError::validation(format!(
                "Invalid appointment status: '{}'",
                other
            ))),
        }
    }
}

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SchedulingError> {
        if end <= start {
            return Err(SchedulingError::validation(
                "End time must be after start time",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn from_duration(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// `[s1,e1)` and `[s2,e2)` overlap iff `s1 < e2 && s2 < e1`; touching
    /// intervals do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub is_telehealth: bool,
    /// Non-owning back-reference to the series definition
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

impl Appointment {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::from_duration(self.start_time, self.duration_minutes)
    }

    /// Descriptive fields carried forward when a series is regenerated
    pub fn details(&self) -> AppointmentDetails {
        AppointmentDetails {
            appointment_type: self.appointment_type.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            room_number: self.room_number.clone(),
            notes: self.notes.clone(),
            duration_minutes: self.duration_minutes,
            is_telehealth: self.is_telehealth,
        }
    }
}

/// Descriptive part of an appointment, irrelevant to the scheduling algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    pub appointment_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub room_number: Option<String>,
    pub notes: Option<String>,
    pub duration_minutes: i32,
    pub is_telehealth: bool,
}

impl AppointmentDetails {
    pub fn new(appointment_type: impl Into<String>, duration_minutes: i32) -> Self {
        Self {
            appointment_type: appointment_type.into(),
            title: None,
            description: None,
            location: None,
            room_number: None,
            notes: None,
            duration_minutes,
            is_telehealth: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_telehealth(mut self, is_telehealth: bool) -> Self {
        self.is_telehealth = is_telehealth;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.appointment_type.trim().is_empty() {
            return Err(SchedulingError::validation("Appointment type is required"));
        }
        if self.duration_minutes <= 0 || self.duration_minutes > 1440 {
            return Err(SchedulingError::validation(
                "Duration must be between 1 and 1440 minutes",
            ));
        }
        if let Some(ref title) = self.title {
            if title.chars().count() > 200 {
                return Err(SchedulingError::validation(
                    "Title must be at most 200 characters",
                ));
            }
        }
        Ok(())
    }

    /// Overlay explicitly provided fields, keeping the rest
    pub fn merged(mut self, update: &AppointmentDetailsUpdate) -> Self {
        if let Some(ref appointment_type) = update.appointment_type {
            self.appointment_type = appointment_type.clone();
        }
        if update.title.is_some() {
            self.title = update.title.clone();
        }
        if update.description.is_some() {
            self.description = update.description.clone();
        }
        if update.location.is_some() {
            self.location = update.location.clone();
        }
        if update.room_number.is_some() {
            self.room_number = update.room_number.clone();
        }
        if update.notes.is_some() {
            self.notes = update.notes.clone();
        }
        if let Some(duration_minutes) = update.duration_minutes {
            self.duration_minutes = duration_minutes;
        }
        if let Some(is_telehealth) = update.is_telehealth {
            self.is_telehealth = is_telehealth;
        }
        self
    }
}

/// Optional overrides of descriptive fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDetailsUpdate {
    pub appointment_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub room_number: Option<String>,
    pub notes: Option<String>,
    pub duration_minutes: Option<i32>,
    pub is_telehealth: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub recurrence_rule_id: Option<Uuid>,
    pub details: AppointmentDetails,
    pub meeting_id: Option<String>,
    pub join_link: Option<String>,
    pub created_by: Uuid,
}

impl NewAppointment {
    pub fn scheduled(
        client_id: Uuid,
        provider_id: Uuid,
        start_time: DateTime<Utc>,
        details: AppointmentDetails,
        created_by: Uuid,
    ) -> Self {
        Self {
            client_id,
            provider_id,
            start_time,
            status: AppointmentStatus::Scheduled,
            recurrence_rule_id: None,
            details,
            meeting_id: None,
            join_link: None,
            created_by,
        }
    }

    pub fn in_series(mut self, rule_id: Uuid) -> Self {
        self.recurrence_rule_id = Some(rule_id);
        self
    }

    /// Materialise the row as the store persists it
    pub fn into_appointment(self, id: Uuid, now: DateTime<Utc>) -> Appointment {
        Appointment {
            id,
            client_id: self.client_id,
            provider_id: self.provider_id,
            start_time: self.start_time,
            duration_minutes: self.details.duration_minutes,
            status: self.status,
            is_telehealth: self.details.is_telehealth,
            recurrence_rule_id: self.recurrence_rule_id,
            appointment_type: self.details.appointment_type,
            title: self.details.title,
            description: self.details.description,
            location: self.details.location,
            room_number: self.details.room_number,
            notes: self.details.notes,
            meeting_id: self.meeting_id,
            join_link: self.join_link,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
            checked_in_at: None,
            completed_at: None,
            cancelled_at: None,
            no_show_at: None,
        }
    }
}

/// Field-level mutation of a stored appointment. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentPatch {
    pub start_time: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub details: AppointmentDetailsUpdate,
    pub meeting_id: Option<String>,
    pub join_link: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
}

impl AppointmentPatch {
    /// Status change stamped with the status-specific timestamp
    pub fn status_change(status: AppointmentStatus, at: DateTime<Utc>) -> Self {
        let mut patch = Self {
            status: Some(status),
            ..Self::default()
        };
        match status {
            AppointmentStatus::CheckedIn => patch.checked_in_at = Some(at),
            AppointmentStatus::Completed => patch.completed_at = Some(at),
            AppointmentStatus::Cancelled => patch.cancelled_at = Some(at),
            AppointmentStatus::NoShow => patch.no_show_at = Some(at),
            AppointmentStatus::Scheduled => {}
        }
        patch
    }

    pub fn meeting(meeting_id: String, join_link: String) -> Self {
        Self {
            meeting_id: Some(meeting_id),
            join_link: Some(join_link),
            ..Self::default()
        }
    }

    pub fn apply(self, appointment: &mut Appointment, now: DateTime<Utc>) {
        if let Some(start_time) = self.start_time {
            appointment.start_time = start_time;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        let merged = appointment.details().merged(&self.details);
        appointment.appointment_type = merged.appointment_type;
        appointment.title = merged.title;
        appointment.description = merged.description;
        appointment.location = merged.location;
        appointment.room_number = merged.room_number;
        appointment.notes = merged.notes;
        appointment.duration_minutes = merged.duration_minutes;
        appointment.is_telehealth = merged.is_telehealth;
        if self.meeting_id.is_some() {
            appointment.meeting_id = self.meeting_id;
        }
        if self.join_link.is_some() {
            appointment.join_link = self.join_link;
        }
        if self.checked_in_at.is_some() {
            appointment.checked_in_at = self.checked_in_at;
        }
        if self.completed_at.is_some() {
            appointment.completed_at = self.completed_at;
        }
        if self.cancelled_at.is_some() {
            appointment.cancelled_at = self.cancelled_at;
        }
        if self.no_show_at.is_some() {
            appointment.no_show_at = self.no_show_at;
        }
        appointment.updated_at = now;
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Recurrence part of a create request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRequest {
    pub pattern: RecurrencePattern,
    pub time_slots: Vec<TimeSlot>,
    /// Weekends are skipped unless the request says otherwise
    #[serde(default = "default_business_days_only")]
    pub business_days_only: bool,
    pub end_date: Option<DateTime<Utc>>,
}

fn default_business_days_only() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub client_id: Uuid,
    /// Defaults to the acting user when absent
    pub provider_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub details: AppointmentDetails,
    /// Book despite detected conflicts; the conflicts are reported, not hidden
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRequest>,
}

impl CreateAppointmentRequest {
    pub fn new(client_id: Uuid, start_time: DateTime<Utc>, details: AppointmentDetails) -> Self {
        Self {
            client_id,
            provider_id: None,
            start_time,
            details,
            force: false,
            recurrence: None,
        }
    }

    pub fn with_provider(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn recurring(mut self, recurrence: RecurrenceRequest) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn resolved_provider(&self, acting_user: Uuid) -> Uuid {
        self.provider_id.unwrap_or(acting_user)
    }
}

/// Edit of an existing recurring series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSeriesRequest {
    pub pattern: RecurrencePattern,
    pub time_slots: Vec<TimeSlot>,
    pub business_days_only: bool,
    /// Keeps the current horizon when absent
    pub end_date: Option<DateTime<Utc>>,
    /// Instances starting at or after this instant are regenerated
    pub anchor: DateTime<Utc>,
    #[serde(default)]
    pub overrides: AppointmentDetailsUpdate,
}

/// Edit of a single appointment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    pub start_time: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    #[serde(default)]
    pub details: AppointmentDetailsUpdate,
}

/// Listing filters, mirroring the appointment search screen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentQuery {
    pub client_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Case-insensitive match against title and appointment type
    pub search: Option<String>,
}

impl AppointmentQuery {
    pub fn matches_search(&self, appointment: &Appointment) -> bool {
        let Some(ref search) = self.search else {
            return true;
        };
        let needle = search.to_lowercase();
        appointment
            .title
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
            .contains(&needle)
            || appointment.appointment_type.to_lowercase().contains(&needle)
    }
}
