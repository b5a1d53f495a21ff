//! Appointment waitlist
//!
//! Clients who could not get a slot are queued with a preferred date and an
//! optional time range. Open entries are served highest priority first, then
//! first come first served.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SchedulingError};
use crate::filter::WaitlistFilter;
use crate::recurrence::parse_time_of_day;
use crate::transaction::TransactionRunner;

pub const DEFAULT_WAITLIST_PRIORITY: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub preferred_date: NaiveDate,
    /// "HH:MM"
    pub preferred_time_start: Option<String>,
    pub preferred_time_end: Option<String>,
    pub appointment_type: String,
    pub notes: Option<String>,
    pub priority: i32,
    pub is_fulfilled: bool,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWaitlistRequest {
    pub client_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub preferred_date: NaiveDate,
    pub preferred_time_start: Option<String>,
    pub preferred_time_end: Option<String>,
    pub appointment_type: String,
    pub notes: Option<String>,
    pub priority: Option<i32>,
}

/// Validated entry with defaults applied, ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWaitlistEntry {
    pub client_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub preferred_date: NaiveDate,
    pub preferred_time_start: Option<String>,
    pub preferred_time_end: Option<String>,
    pub appointment_type: String,
    pub notes: Option<String>,
    pub priority: i32,
}

impl NewWaitlistEntry {
    pub fn into_entry(self, id: Uuid, now: DateTime<Utc>) -> WaitlistEntry {
        WaitlistEntry {
            id,
            client_id: self.client_id,
            provider_id: self.provider_id,
            preferred_date: self.preferred_date,
            preferred_time_start: self.preferred_time_start,
            preferred_time_end: self.preferred_time_end,
            appointment_type: self.appointment_type,
            notes: self.notes,
            priority: self.priority,
            is_fulfilled: false,
            fulfilled_at: None,
            created_at: now,
        }
    }
}

impl TryFrom<CreateWaitlistRequest> for NewWaitlistEntry {
    type Error = SchedulingError;

    fn try_from(request: CreateWaitlistRequest) -> Result<Self> {
        if request.appointment_type.trim().is_empty() {
            return Err(SchedulingError::validation("Appointment type is required"));
        }
        let priority = request.priority.unwrap_or(DEFAULT_WAITLIST_PRIORITY);
        if priority < 1 {
            return Err(SchedulingError::validation("Waitlist priority must be at least 1"));
        }

        let start = request.preferred_time_start.as_deref().map(parse_time_of_day).transpose()?;
        let end = request.preferred_time_end.as_deref().map(parse_time_of_day).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(SchedulingError::validation(
                    "Preferred end time must be after preferred start time",
                ));
            }
        }

        Ok(Self {
            client_id: request.client_id,
            provider_id: request.provider_id,
            preferred_date: request.preferred_date,
            preferred_time_start: start.map(|t| t.format("%H:%M").to_string()),
            preferred_time_end: end.map(|t| t.format("%H:%M").to_string()),
            appointment_type: request.appointment_type,
            notes: request.notes,
            priority,
        })
    }
}

pub struct WaitlistService {
    runner: Arc<TransactionRunner>,
}

impl WaitlistService {
    pub fn new(runner: Arc<TransactionRunner>) -> Self {
        Self { runner }
    }

    pub async fn create_entry(&self, request: CreateWaitlistRequest) -> Result<WaitlistEntry> {
        let entry = NewWaitlistEntry::try_from(request)?;
        let created = self
            .runner
            .run("create_waitlist_entry", move |mut tx| {
                let entry = entry.clone();
                async move {
                    let result = tx.create_waitlist_entry(entry).await.map_err(SchedulingError::from);
                    (tx, result)
                }
            })
            .await?;

        info!(entry_id = %created.id, priority = created.priority, "Waitlist entry created");
        Ok(created)
    }

    /// Unfulfilled entries, highest priority first, then oldest first
    pub async fn open_entries(&self) -> Result<Vec<WaitlistEntry>> {
        self.runner
            .run("open_waitlist", |mut tx| async move {
                let result = tx
                    .find_waitlist_entries(&WaitlistFilter::open())
                    .await
                    .map_err(SchedulingError::from);
                (tx, result)
            })
            .await
    }

    pub async fn fulfill(&self, id: Uuid) -> Result<WaitlistEntry> {
        self.runner
            .run("fulfill_waitlist_entry", move |mut tx| async move {
                let result = fulfill_in(tx.as_mut(), id).await;
                (tx, result)
            })
            .await
    }
}

async fn fulfill_in(tx: &mut dyn crate::store::StoreTransaction, id: Uuid) -> Result<WaitlistEntry> {
    let entries = tx.find_waitlist_entries(&WaitlistFilter::default()).await?;
    let entry = entries
        .into_iter()
        .find(|entry| entry.id == id)
        .ok_or_else(|| SchedulingError::not_found("waitlist_entry", id))?;
    if entry.is_fulfilled {
        return Err(SchedulingError::validation(format!(
            "Waitlist entry {} is already fulfilled",
            id
        )));
    }
    Ok(tx.mark_waitlist_fulfilled(id, Utc::now()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateWaitlistRequest {
        CreateWaitlistRequest {
            client_id: Uuid::new_v4(),
            provider_id: None,
            preferred_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            preferred_time_start: Some("9:00".into()),
            preferred_time_end: Some("12:30".into()),
            appointment_type: "intake".into(),
            notes: None,
            priority: None,
        }
    }

    #[test]
    fn test_defaults_and_time_normalisation() {
        let entry = NewWaitlistEntry::try_from(request()).unwrap();
        assert_eq!(entry.priority, DEFAULT_WAITLIST_PRIORITY);
        assert_eq!(entry.preferred_time_start.as_deref(), Some("09:00"));
        assert_eq!(entry.preferred_time_end.as_deref(), Some("12:30"));
    }

    #[test]
    fn test_rejects_inverted_range_and_bad_priority() {
        let inverted = CreateWaitlistRequest {
            preferred_time_start: Some("13:00".into()),
            ..request()
        };
        assert!(matches!(
            NewWaitlistEntry::try_from(inverted),
            Err(SchedulingError::Validation(_))
        ));

        let zero = CreateWaitlistRequest {
            priority: Some(0),
            ..request()
        };
        assert!(NewWaitlistEntry::try_from(zero).is_err());

        let malformed = CreateWaitlistRequest {
            preferred_time_end: Some("noon".into()),
            ..request()
        };
        assert!(matches!(
            NewWaitlistEntry::try_from(malformed),
            Err(SchedulingError::InvalidTimeFormat(_))
        ));
    }
}
