//! Conflict detection
//!
//! A candidate booking conflicts with every existing appointment that
//! involves the same provider or the same client, occupies its slot (not
//! cancelled, not a no-show) and overlaps the candidate's half-open window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::{AppointmentFilter, Participants};
use crate::models::{Appointment, TimeWindow};
use crate::store::StoreTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ProviderOverlap,
    ClientOverlap,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderOverlap => "provider_overlap",
            Self::ClientOverlap => "client_overlap",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::ProviderOverlap => "Provider already has an appointment at this time",
            Self::ClientOverlap => "Client already has an appointment at this time",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub appointment: Appointment,
    pub conflict_type: ConflictType,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn extend(&mut self, other: ConflictReport) {
        self.conflicts.extend(other.conflicts);
    }
}

/// Candidate booking to test against existing appointments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCheck {
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ignore this appointment, used when rescheduling it
    pub exclude_appointment_id: Option<Uuid>,
}

impl ConflictCheck {
    pub fn new(
        provider_id: Uuid,
        client_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        TimeWindow::new(start_time, end_time)?;
        Ok(Self {
            provider_id,
            client_id,
            start_time,
            end_time,
            exclude_appointment_id: None,
        })
    }

    pub fn for_duration(
        provider_id: Uuid,
        client_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Self> {
        let window = TimeWindow::from_duration(start_time, duration_minutes);
        Self::new(provider_id, client_id, window.start, window.end)
    }

    pub fn excluding(mut self, appointment_id: Uuid) -> Self {
        self.exclude_appointment_id = Some(appointment_id);
        self
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }

    fn filter(&self) -> AppointmentFilter {
        AppointmentFilter::blocking(
            Participants {
                provider_id: self.provider_id,
                client_id: self.client_id,
            },
            self.window(),
        )
        .excluding(self.exclude_appointment_id)
    }
}

pub struct ConflictDetector;

impl ConflictDetector {
    /// Classify candidate appointments against a check.
    ///
    /// Candidates that do not actually block the window are dropped, so the
    /// result is correct even if the store over-fetches. A shared provider is
    /// reported as a provider overlap even when the client also matches.
    pub fn classify(
        check: &ConflictCheck,
        candidates: impl IntoIterator<Item = Appointment>,
    ) -> ConflictReport {
        let filter = check.filter();
        let conflicts = candidates
            .into_iter()
            .filter(|appointment| filter.matches(appointment))
            .map(|appointment| {
                let conflict_type = if appointment.provider_id == check.provider_id {
                    ConflictType::ProviderOverlap
                } else {
                    ConflictType::ClientOverlap
                };
                Conflict {
                    appointment,
                    conflict_type,
                    message: conflict_type.message().to_string(),
                }
            })
            .collect();
        ConflictReport { conflicts }
    }

    /// Read the blocking appointments inside `tx` and classify them.
    ///
    /// Runs in the caller's transaction so that a booking made on the result
    /// is serialized against concurrent bookings.
    pub async fn find_conflicts(
        tx: &mut dyn StoreTransaction,
        check: &ConflictCheck,
    ) -> Result<ConflictReport> {
        let candidates = tx.find_appointments(&check.filter()).await?;
        let report = Self::classify(check, candidates);
        if report.has_conflicts() {
            debug!(
                provider_id = %check.provider_id,
                client_id = %check.client_id,
                conflicts = report.conflicts.len(),
                "Conflicts detected"
            );
        }
        Ok(report)
    }
}
