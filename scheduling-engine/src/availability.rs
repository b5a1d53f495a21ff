//! Provider working hours and one-off schedule exceptions

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SchedulingError};
use crate::filter::ProviderScheduleFilter;
use crate::recurrence::parse_time_of_day;
use crate::transaction::TransactionRunner;

pub const DEFAULT_SCHEDULE_STATUS: &str = "active";

// =============================================================================
// Weekly schedules
// =============================================================================

/// Recurring weekly block in which a provider sees clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchedule {
    pub id: Uuid,
    pub provider_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProviderScheduleRequest {
    pub provider_id: Uuid,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub is_available: Option<bool>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

impl CreateProviderScheduleRequest {
    pub fn new(
        provider_id: Uuid,
        day_of_week: u8,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            provider_id,
            day_of_week,
            start_time: start_time.into(),
            end_time: end_time.into(),
            is_available: None,
            break_start_time: None,
            break_end_time: None,
            effective_from: None,
            effective_until: None,
            status: None,
        }
    }

    pub fn with_break(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.break_start_time = Some(start.into());
        self.break_end_time = Some(end.into());
        self
    }
}

/// Validated schedule with defaults applied, ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProviderSchedule {
    pub provider_id: Uuid,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
    pub status: String,
}

impl NewProviderSchedule {
    pub fn from_request(request: CreateProviderScheduleRequest, now: DateTime<Utc>) -> Result<Self> {
        if request.day_of_week > 6 {
            return Err(SchedulingError::validation(format!(
                "Day of week must be 0-6, got {}",
                request.day_of_week
            )));
        }

        let start = parse_time_of_day(&request.start_time)?;
        let end = parse_time_of_day(&request.end_time)?;
        if end <= start {
            return Err(SchedulingError::validation("Schedule end time must be after start time"));
        }

        let break_start = request.break_start_time.as_deref().map(parse_time_of_day).transpose()?;
        let break_end = request.break_end_time.as_deref().map(parse_time_of_day).transpose()?;
        match (break_start, break_end) {
            (Some(bs), Some(be)) if bs < start || be > end || be <= bs => {
                return Err(SchedulingError::validation(
                    "Break must lie within the working hours",
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(SchedulingError::validation(
                    "Break start and end must be given together",
                ));
            }
            _ => {}
        }

        let effective_from = request.effective_from.unwrap_or(now);
        if request.effective_until.is_some_and(|until| until < effective_from) {
            return Err(SchedulingError::validation(
                "Schedule cannot end before it becomes effective",
            ));
        }

        Ok(Self {
            provider_id: request.provider_id,
            day_of_week: request.day_of_week,
            start_time: hh_mm(start),
            end_time: hh_mm(end),
            is_available: request.is_available.unwrap_or(true),
            break_start_time: break_start.map(hh_mm),
            break_end_time: break_end.map(hh_mm),
            effective_from,
            effective_until: request.effective_until,
            status: request
                .status
                .unwrap_or_else(|| DEFAULT_SCHEDULE_STATUS.to_string()),
        })
    }

    pub fn into_schedule(self, id: Uuid, now: DateTime<Utc>) -> ProviderSchedule {
        ProviderSchedule {
            id,
            provider_id: self.provider_id,
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            is_available: self.is_available,
            break_start_time: self.break_start_time,
            break_end_time: self.break_end_time,
            effective_from: self.effective_from,
            effective_until: self.effective_until,
            status: self.status,
            created_at: now,
        }
    }
}

// =============================================================================
// Exceptions
// =============================================================================

/// Deviation from the weekly schedule on a single date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleException {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub exception_date: NaiveDate,
    /// Partial-day exception when both are set
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_unavailable: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduleException {
    pub provider_id: Uuid,
    pub exception_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_unavailable: bool,
    pub reason: Option<String>,
}

impl NewScheduleException {
    /// Whole-day absence
    pub fn unavailable(provider_id: Uuid, exception_date: NaiveDate, reason: Option<String>) -> Self {
        Self {
            provider_id,
            exception_date,
            start_time: None,
            end_time: None,
            is_unavailable: true,
            reason,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let start = self.start_time.as_deref().map(parse_time_of_day).transpose()?;
        let end = self.end_time.as_deref().map(parse_time_of_day).transpose()?;
        match (start, end) {
            (Some(start), Some(end)) if end <= start => Err(SchedulingError::validation(
                "Exception end time must be after start time",
            )),
            (Some(_), None) | (None, Some(_)) => Err(SchedulingError::validation(
                "Exception start and end must be given together",
            )),
            _ => Ok(()),
        }
    }

    pub fn into_exception(self, id: Uuid, now: DateTime<Utc>) -> ScheduleException {
        ScheduleException {
            id,
            provider_id: self.provider_id,
            exception_date: self.exception_date,
            start_time: self.start_time,
            end_time: self.end_time,
            is_unavailable: self.is_unavailable,
            reason: self.reason,
            created_at: now,
        }
    }
}

fn hh_mm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

// =============================================================================
// Service
// =============================================================================

pub struct AvailabilityService {
    runner: Arc<TransactionRunner>,
}

impl AvailabilityService {
    pub fn new(runner: Arc<TransactionRunner>) -> Self {
        Self { runner }
    }

    pub async fn create_schedule(&self, request: CreateProviderScheduleRequest) -> Result<ProviderSchedule> {
        let schedule = NewProviderSchedule::from_request(request, Utc::now())?;
        let created = self
            .runner
            .run("create_provider_schedule", move |mut tx| {
                let schedule = schedule.clone();
                async move {
                    let result = tx
                        .create_provider_schedule(schedule)
                        .await
                        .map_err(SchedulingError::from);
                    (tx, result)
                }
            })
            .await?;

        info!(
            schedule_id = %created.id,
            provider_id = %created.provider_id,
            day_of_week = created.day_of_week,
            "Provider schedule created"
        );
        Ok(created)
    }

    /// Ordered by day of week, then start time
    pub async fn schedules(&self, provider_id: Option<Uuid>) -> Result<Vec<ProviderSchedule>> {
        let filter = ProviderScheduleFilter { provider_id };
        self.runner
            .run("provider_schedules", |mut tx| {
                let filter = filter.clone();
                async move {
                    let result = tx
                        .find_provider_schedules(&filter)
                        .await
                        .map_err(SchedulingError::from);
                    (tx, result)
                }
            })
            .await
    }

    pub async fn create_exception(&self, exception: NewScheduleException) -> Result<ScheduleException> {
        exception.validate()?;
        let created = self
            .runner
            .run("create_schedule_exception", move |mut tx| {
                let exception = exception.clone();
                async move {
                    let result = tx
                        .create_schedule_exception(exception)
                        .await
                        .map_err(SchedulingError::from);
                    (tx, result)
                }
            })
            .await?;

        info!(exception_id = %created.id, date = %created.exception_date, "Schedule exception created");
        Ok(created)
    }

    /// Ordered by exception date
    pub async fn exceptions(&self, provider_id: Option<Uuid>) -> Result<Vec<ScheduleException>> {
        self.runner
            .run("schedule_exceptions", move |mut tx| async move {
                let result = tx
                    .find_schedule_exceptions(provider_id)
                    .await
                    .map_err(SchedulingError::from);
                (tx, result)
            })
            .await
    }
}
