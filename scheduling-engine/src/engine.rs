use std::sync::Arc;

use crate::availability::AvailabilityService;
use crate::config::SchedulingConfig;
use crate::lifecycle::AppointmentLifecycleManager;
use crate::store::SchedulingStore;
use crate::transaction::TransactionRunner;
use crate::waitlist::WaitlistService;

/// Scheduling services sharing one store and one retry policy
pub struct SchedulingEngine {
    pub appointments: AppointmentLifecycleManager,
    pub waitlist: WaitlistService,
    pub availability: AvailabilityService,
}

impl SchedulingEngine {
    pub fn new(store: Arc<dyn SchedulingStore>, config: SchedulingConfig) -> Self {
        let runner = Arc::new(TransactionRunner::new(store, config.transaction.clone()));
        Self {
            waitlist: WaitlistService::new(Arc::clone(&runner)),
            availability: AvailabilityService::new(Arc::clone(&runner)),
            appointments: AppointmentLifecycleManager::with_runner(runner, config),
        }
    }

    /// Configure the appointment manager (collaborators, redaction) in place
    pub fn map_appointments(
        mut self,
        configure: impl FnOnce(AppointmentLifecycleManager) -> AppointmentLifecycleManager,
    ) -> Self {
        self.appointments = configure(self.appointments);
        self
    }
}
