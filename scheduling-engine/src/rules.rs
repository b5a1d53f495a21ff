//! Persistence of recurrence rules
//!
//! Rules are always read and written inside the caller's transaction so that
//! a series edit (rule update, instance delete, instance regeneration) commits
//! or rolls back as one unit. A rule is only deleted together with its
//! instances; see `AppointmentLifecycleManager::delete_series`.

use uuid::Uuid;

use crate::error::{Result, SchedulingError};
use crate::models::{NewRecurrenceRule, RecurrenceRule, RecurrenceRulePatch};
use crate::recurrence::parse_time_of_day;
use crate::store::StoreTransaction;

pub const RULE_RESOURCE: &str = "recurrence_rule";

pub struct RecurringRuleStore;

impl RecurringRuleStore {
    pub async fn create(tx: &mut dyn StoreTransaction, rule: NewRecurrenceRule) -> Result<RecurrenceRule> {
        rule.validate()?;
        for slot in &rule.time_slots {
            parse_time_of_day(&slot.time)?;
        }
        Ok(tx.create_rule(rule).await?)
    }

    pub async fn get(tx: &mut dyn StoreTransaction, id: Uuid) -> Result<RecurrenceRule> {
        tx.get_rule(id)
            .await?
            .ok_or_else(|| SchedulingError::not_found(RULE_RESOURCE, id))
    }

    pub async fn update(
        tx: &mut dyn StoreTransaction,
        id: Uuid,
        patch: RecurrenceRulePatch,
    ) -> Result<RecurrenceRule> {
        if let Some(ref slots) = patch.time_slots {
            for slot in slots {
                parse_time_of_day(&slot.time)?;
            }
        }
        Ok(tx.update_rule(id, patch).await?)
    }

    pub async fn delete(tx: &mut dyn StoreTransaction, id: Uuid) -> Result<()> {
        Ok(tx.delete_rule(id).await?)
    }
}
