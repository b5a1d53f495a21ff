//! Video meetings for telehealth appointments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logger_redacted::{redacted_warn, PhiRedactor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::models::Appointment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingLink {
    pub meeting_id: String,
    pub join_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub title: Option<String>,
}

impl From<&Appointment> for MeetingRequest {
    fn from(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            provider_id: appointment.provider_id,
            client_id: appointment.client_id,
            start_time: appointment.start_time,
            duration_minutes: appointment.duration_minutes,
            title: appointment.title.clone(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoMeetingProvisioner: Send + Sync {
    /// `Ok(None)` when the provider declined to create a room
    async fn create_meeting(&self, request: &MeetingRequest) -> Result<Option<MeetingLink>, CollaboratorError>;
}

/// Calls the provisioner under a timeout and turns every failure into `None`
#[derive(Clone)]
pub struct MeetingCoordinator {
    provisioner: Option<Arc<dyn VideoMeetingProvisioner>>,
    timeout: Duration,
    redactor: Arc<PhiRedactor>,
}

impl MeetingCoordinator {
    pub fn new(provisioner: Option<Arc<dyn VideoMeetingProvisioner>>, timeout: Duration) -> Self {
        Self {
            provisioner,
            timeout,
            redactor: Arc::new(PhiRedactor::default()),
        }
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn VideoMeetingProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_redactor(mut self, redactor: PhiRedactor) -> Self {
        self.redactor = Arc::new(redactor);
        self
    }

    pub async fn provision(&self, request: &MeetingRequest) -> Option<MeetingLink> {
        let provisioner = self.provisioner.as_ref()?;
        match tokio::time::timeout(self.timeout, provisioner.create_meeting(request)).await {
            Ok(Ok(Some(link))) => {
                info!(
                    appointment_id = %request.appointment_id,
                    meeting_id = %link.meeting_id,
                    "Video meeting provisioned"
                );
                Some(link)
            }
            Ok(Ok(None)) => {
                warn!(appointment_id = %request.appointment_id, "Video meeting provider returned no room");
                None
            }
            Ok(Err(error)) => {
                redacted_warn!(
                    self.redactor,
                    error,
                    appointment_id = %request.appointment_id,
                    "Video meeting provisioning failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    appointment_id = %request.appointment_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Video meeting provisioning timed out"
                );
                None
            }
        }
    }
}
