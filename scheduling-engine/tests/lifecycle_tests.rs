//! Appointment lifecycle integration tests
//!
//! Scenarios run against the in-memory store:
//! 1. Single bookings and provider/client overlap detection
//! 2. Forced bookings that report the conflicts they override
//! 3. Recurring series creation, atomicity and the series conflict policy
//! 4. Series edits that keep history and regenerate the future
//! 5. The status state machine and its timestamps
//! 6. Concurrent double booking, retry exhaustion and timeouts
//! 7. Best-effort notifications and video meetings

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use scheduling_engine::*;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
}

fn fast_config() -> SchedulingConfig {
    SchedulingConfig {
        transaction: TransactionPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            timeout_ms: 2000,
            backoff: BackoffStrategy::Fixed,
        },
        ..SchedulingConfig::default()
    }
}

fn setup(config: SchedulingConfig) -> (InMemorySchedulingStore, SchedulingEngine) {
    let store = InMemorySchedulingStore::new();
    let engine = SchedulingEngine::new(Arc::new(store.clone()), config);
    (store, engine)
}

fn therapy(client: Uuid, provider: Uuid, start: DateTime<Utc>) -> CreateAppointmentRequest {
    CreateAppointmentRequest::new(client, start, AppointmentDetails::new("therapy", 60)).with_provider(provider)
}

fn weekly_wednesdays(end: DateTime<Utc>) -> RecurrenceRequest {
    RecurrenceRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(3, "14:00")],
        business_days_only: false,
        end_date: Some(end),
    }
}

// ============================================================================
// Single bookings and conflicts
// ============================================================================

#[tokio::test]
async fn test_overlap_is_rejected_and_touching_slot_is_not() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();

    let first = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(8, 10, 0)), provider)
        .await
        .unwrap();
    assert_eq!(first.appointment.status, AppointmentStatus::Scheduled);
    assert!(!first.overridden.has_conflicts());

    let err = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(8, 10, 30)), provider)
        .await
        .unwrap_err();
    match err {
        SchedulingError::Conflict { report } => {
            assert_eq!(report.conflicts.len(), 1);
            assert_eq!(report.conflicts[0].conflict_type, ConflictType::ProviderOverlap);
            assert_eq!(report.conflicts[0].appointment.id, first.appointment.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(8, 11, 0)), provider)
        .await
        .unwrap();
    assert_eq!(store.appointments().len(), 2);
    println!("✅ 10:30 rejected, 11:00 accepted");
}

#[tokio::test]
async fn test_client_double_booking_with_other_provider() {
    let (_store, engine) = setup(fast_config());
    let client = Uuid::new_v4();
    let (provider_a, provider_b) = (Uuid::new_v4(), Uuid::new_v4());

    engine
        .appointments
        .create_single(&therapy(client, provider_a, at(9, 9, 0)), provider_a)
        .await
        .unwrap();

    let err = engine
        .appointments
        .create_single(&therapy(client, provider_b, at(9, 9, 45)), provider_b)
        .await
        .unwrap_err();
    match err {
        SchedulingError::Conflict { report } => {
            assert_eq!(report.conflicts[0].conflict_type, ConflictType::ClientOverlap);
            assert_eq!(report.conflicts[0].message, ConflictType::ClientOverlap.message());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_appointment_frees_its_slot() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();

    let booking = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(10, 15, 0)), provider)
        .await
        .unwrap();
    engine
        .appointments
        .update_status(booking.appointment.id, AppointmentStatus::Cancelled, provider)
        .await
        .unwrap();

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(10, 15, 0)), provider)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_forced_booking_reports_overridden_conflicts() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(11, 13, 0)), provider)
        .await
        .unwrap();

    let forced = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(11, 13, 15)).forced(), provider)
        .await
        .unwrap();
    assert_eq!(forced.overridden.conflicts.len(), 1);
    assert_eq!(store.appointments().len(), 2);
}

#[tokio::test]
async fn test_provider_defaults_to_acting_user() {
    let (_store, engine) = setup(fast_config());
    let actor = Uuid::new_v4();
    let request = CreateAppointmentRequest::new(Uuid::new_v4(), at(12, 9, 0), AppointmentDetails::new("intake", 90));

    let booking = engine.appointments.create_single(&request, actor).await.unwrap();
    assert_eq!(booking.appointment.provider_id, actor);
    assert_eq!(booking.appointment.created_by, actor);
    assert_eq!(booking.appointment.end_time(), at(12, 10, 30));
}

#[tokio::test]
async fn test_invalid_details_are_rejected_without_writes() {
    let (store, engine) = setup(fast_config());
    let request = CreateAppointmentRequest::new(Uuid::new_v4(), at(12, 9, 0), AppointmentDetails::new("therapy", 0));

    let err = engine.appointments.create_single(&request, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
    assert_eq!(store.committed_writes(), 0);
}

#[tokio::test]
async fn test_check_conflicts_preview() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let client = Uuid::new_v4();
    engine
        .appointments
        .create_single(&therapy(client, provider, at(15, 10, 0)), provider)
        .await
        .unwrap();

    let check = ConflictCheck::new(provider, Uuid::new_v4(), at(15, 10, 30), at(15, 11, 30)).unwrap();
    let report = engine.appointments.check_conflicts(&check).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);

    let touching = ConflictCheck::new(provider, Uuid::new_v4(), at(15, 11, 0), at(15, 12, 0)).unwrap();
    assert!(!engine.appointments.check_conflicts(&touching).await.unwrap().has_conflicts());
}

// ============================================================================
// Recurring series
// ============================================================================

#[tokio::test]
async fn test_weekly_series_books_every_wednesday() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0))
        .recurring(weekly_wednesdays(end_of_day(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())));

    let outcome = engine.appointments.create_appointment(&request, provider).await.unwrap();
    let BookingOutcome::Series(series) = outcome else {
        panic!("expected a series booking");
    };

    let starts: Vec<_> = series.appointments.iter().map(|a| a.start_time).collect();
    assert_eq!(
        starts,
        vec![at(3, 14, 0), at(10, 14, 0), at(17, 14, 0), at(24, 14, 0), at(31, 14, 0)]
    );
    assert!(series
        .appointments
        .iter()
        .all(|a| a.recurrence_rule_id == Some(series.rule.id)));
    assert_eq!(store.rule(series.rule.id), Some(series.rule.clone()));
    assert_eq!(store.appointments().len(), 5);
    println!("✅ Weekly series: {} instances", starts.len());
}

#[tokio::test]
async fn test_series_without_end_date_uses_default_horizon() {
    let config = SchedulingConfig {
        default_horizon_days: 14,
        ..fast_config()
    };
    let (_store, engine) = setup(config);
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(RecurrenceRequest {
        pattern: RecurrencePattern::Daily,
        time_slots: vec![TimeSlot::daily("09:00")],
        business_days_only: true,
        end_date: None,
    });

    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();
    assert_eq!(series.rule.end_date, at(15, 0, 0));
    // Jan 1-14 2024 holds ten weekdays
    assert_eq!(series.appointments.len(), 10);
    assert!(series
        .appointments
        .iter()
        .all(|a| !matches!(a.start_time.weekday(), Weekday::Sat | Weekday::Sun)));
}

#[tokio::test]
async fn test_failed_bulk_insert_rolls_back_the_rule() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    store.faults().fail_bulk_inserts(1);

    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let err = engine.appointments.create_recurring(&request, provider).await.unwrap_err();

    assert!(matches!(err, SchedulingError::Store(StoreError::Backend(_))));
    assert!(store.appointments().is_empty());
    assert_eq!(store.committed_writes(), 0);
    println!("✅ Rule and instances rolled back together");
}

#[tokio::test]
async fn test_series_skips_conflict_checks_by_default() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(10, 14, 30)), provider)
        .await
        .unwrap();

    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();

    assert_eq!(series.appointments.len(), 5);
    assert!(!series.overridden.has_conflicts());
    assert_eq!(store.appointments().len(), 6);
}

#[tokio::test]
async fn test_series_conflict_check_when_enabled() {
    let config = SchedulingConfig {
        skip_conflict_check_for_series: false,
        ..fast_config()
    };
    let (store, engine) = setup(config);
    let provider = Uuid::new_v4();
    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(10, 14, 30)), provider)
        .await
        .unwrap();

    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let err = engine.appointments.create_recurring(&request, provider).await.unwrap_err();
    match err {
        SchedulingError::Conflict { report } => assert_eq!(report.conflicts.len(), 1),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(store.appointments().len(), 1);

    let forced = engine
        .appointments
        .create_recurring(&request.clone().forced(), provider)
        .await
        .unwrap();
    assert_eq!(forced.overridden.conflicts.len(), 1);
    assert_eq!(store.appointments().len(), 6);
}

#[tokio::test]
async fn test_empty_slots_fall_back_to_single_booking() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(2, 9, 0)).recurring(RecurrenceRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: Vec::new(),
        business_days_only: false,
        end_date: None,
    });

    let outcome = engine.appointments.create_appointment(&request, provider).await.unwrap();
    assert!(matches!(outcome, BookingOutcome::Single(_)));
    assert_eq!(outcome.appointments().len(), 1);

    let err = engine.appointments.create_recurring(&request, provider).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
}

#[tokio::test]
async fn test_malformed_slot_time_is_rejected() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(RecurrenceRequest {
        pattern: RecurrencePattern::Daily,
        time_slots: vec![TimeSlot::daily("25:00")],
        business_days_only: false,
        end_date: Some(at(7, 0, 0)),
    });

    let err = engine.appointments.create_recurring(&request, provider).await.unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidTimeFormat(_)));
    assert_eq!(store.committed_writes(), 0);
}

#[tokio::test]
async fn test_series_without_instances_is_rejected() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    // Saturdays only, but weekends are excluded
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(RecurrenceRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(6, "10:00")],
        business_days_only: true,
        end_date: Some(at(31, 23, 59)),
    });

    let err = engine.appointments.create_recurring(&request, provider).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
    assert!(store.appointments().is_empty());
    assert_eq!(store.committed_writes(), 0);
}

// ============================================================================
// Series edits
// ============================================================================

#[tokio::test]
async fn test_series_edit_preserves_history() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0))
        .recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();
    let past: Vec<Appointment> = series.appointments[..2].to_vec();

    // Move the remaining sessions to Fridays at 10:00, 45 minutes long
    let update = UpdateSeriesRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(5, "10:00")],
        business_days_only: false,
        end_date: None,
        anchor: at(15, 0, 0),
        overrides: AppointmentDetailsUpdate {
            duration_minutes: Some(45),
            ..Default::default()
        },
    };
    let edited = engine
        .appointments
        .update_series(series.rule.id, &update, provider)
        .await
        .unwrap();

    assert_eq!(edited.deleted, 3);
    assert_eq!(edited.preserved, 2);
    let starts: Vec<_> = edited.appointments.iter().map(|a| a.start_time).collect();
    assert_eq!(starts, vec![at(19, 10, 0), at(26, 10, 0)]);
    assert!(edited.appointments.iter().all(|a| a.duration_minutes == 45));
    assert_eq!(edited.rule.pattern, RecurrencePattern::Weekly);
    assert_eq!(edited.rule.time_slots, vec![TimeSlot::weekly(5, "10:00")]);
    assert_eq!(edited.rule.end_date, series.rule.end_date);

    let stored = store.appointments();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[..2], past[..]);
    println!("✅ Series edit kept {} past sessions", edited.preserved);
}

#[tokio::test]
async fn test_failed_series_edit_leaves_series_untouched() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();

    let appointments_before = store.appointments();
    let rule_before = store.rule(series.rule.id);
    let writes_before = store.committed_writes();

    store.faults().fail_bulk_inserts(1);
    let update = UpdateSeriesRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(5, "10:00")],
        business_days_only: false,
        end_date: None,
        anchor: at(15, 0, 0),
        overrides: AppointmentDetailsUpdate::default(),
    };
    let err = engine
        .appointments
        .update_series(series.rule.id, &update, provider)
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulingError::Store(StoreError::Backend(_))));
    assert_eq!(store.appointments(), appointments_before);
    assert_eq!(store.rule(series.rule.id), rule_before);
    assert_eq!(store.committed_writes(), writes_before);
    println!("✅ Series edit rolled back: {} instances intact", appointments_before.len());
}

#[tokio::test]
async fn test_series_edit_cannot_empty_the_series() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();
    let appointments_before = store.appointments();

    // Anchored before the first instance, so nothing would survive
    let update = UpdateSeriesRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(6, "10:00")],
        business_days_only: true,
        end_date: None,
        anchor: at(1, 0, 0),
        overrides: AppointmentDetailsUpdate::default(),
    };
    let err = engine
        .appointments
        .update_series(series.rule.id, &update, provider)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
    assert_eq!(store.appointments(), appointments_before);
    assert_eq!(store.rule(series.rule.id), Some(series.rule.clone()));

    // Ending the series early keeps its history and stays editable
    let truncate = UpdateSeriesRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(3, "14:00")],
        business_days_only: false,
        end_date: Some(at(14, 23, 59)),
        anchor: at(15, 0, 0),
        overrides: AppointmentDetailsUpdate::default(),
    };
    let truncated = engine
        .appointments
        .update_series(series.rule.id, &truncate, provider)
        .await
        .unwrap();
    assert_eq!(truncated.deleted, 3);
    assert_eq!(truncated.preserved, 2);
    assert!(truncated.appointments.is_empty());

    let extend = UpdateSeriesRequest {
        end_date: Some(at(31, 23, 59)),
        ..truncate
    };
    let extended = engine
        .appointments
        .update_series(series.rule.id, &extend, provider)
        .await
        .unwrap();
    let starts: Vec<_> = extended.appointments.iter().map(|a| a.start_time).collect();
    assert_eq!(starts, vec![at(17, 14, 0), at(24, 14, 0), at(31, 14, 0)]);
}

#[tokio::test]
async fn test_series_edit_of_unknown_rule_is_not_found() {
    let (_store, engine) = setup(fast_config());
    let update = UpdateSeriesRequest {
        pattern: RecurrencePattern::Daily,
        time_slots: vec![TimeSlot::daily("09:00")],
        business_days_only: false,
        end_date: None,
        anchor: at(1, 0, 0),
        overrides: AppointmentDetailsUpdate::default(),
    };
    let err = engine
        .appointments
        .update_series(Uuid::new_v4(), &update, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { resource: "recurrence_rule", .. }));
}

#[tokio::test]
async fn test_delete_series_removes_instances_and_rule() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let request = therapy(Uuid::new_v4(), provider, at(1, 0, 0)).recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();

    let deleted = engine.appointments.delete_series(series.rule.id, provider).await.unwrap();
    assert_eq!(deleted, 5);
    assert!(store.appointments().is_empty());
    assert!(store.rule(series.rule.id).is_none());

    let err = engine.appointments.recurrence_rule(series.rule.id).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { .. }));
}

// ============================================================================
// Status state machine and edits
// ============================================================================

#[tokio::test]
async fn test_status_transitions_stamp_timestamps() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let booking = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(16, 9, 0)), provider)
        .await
        .unwrap();
    let id = booking.appointment.id;

    let checked_in = engine
        .appointments
        .update_status(id, AppointmentStatus::CheckedIn, provider)
        .await
        .unwrap();
    assert!(checked_in.checked_in_at.is_some());
    assert!(checked_in.completed_at.is_none());

    let completed = engine
        .appointments
        .update_status(id, AppointmentStatus::Completed, provider)
        .await
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.checked_in_at, checked_in.checked_in_at);
}

#[tokio::test]
async fn test_terminal_status_cannot_be_reopened() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let booking = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(16, 11, 0)), provider)
        .await
        .unwrap();
    let id = booking.appointment.id;

    engine
        .appointments
        .update_status(id, AppointmentStatus::Cancelled, provider)
        .await
        .unwrap();
    let err = engine
        .appointments
        .update_status(id, AppointmentStatus::Scheduled, provider)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulingError::InvalidStateTransition {
            from: AppointmentStatus::Cancelled,
            to: AppointmentStatus::Scheduled,
        }
    ));

    let cancelled = engine.appointments.get_appointment(id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
}

#[tokio::test]
async fn test_reschedule_checks_conflicts_but_ignores_itself() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let first = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(17, 9, 0)), provider)
        .await
        .unwrap();
    let second = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(17, 11, 0)), provider)
        .await
        .unwrap();

    // Shifting by 30 minutes overlaps only its own old slot
    let moved = engine
        .appointments
        .update_appointment(
            first.appointment.id,
            &AppointmentUpdate {
                start_time: Some(at(17, 9, 30)),
                ..Default::default()
            },
            provider,
        )
        .await
        .unwrap();
    assert_eq!(moved.start_time, at(17, 9, 30));

    let err = engine
        .appointments
        .update_appointment(
            first.appointment.id,
            &AppointmentUpdate {
                start_time: Some(at(17, 10, 30)),
                ..Default::default()
            },
            provider,
        )
        .await
        .unwrap_err();
    match err {
        SchedulingError::Conflict { report } => {
            assert_eq!(report.conflicts[0].appointment.id, second.appointment.id)
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_completed_appointment_cannot_be_rescheduled() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let booking = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(18, 9, 0)), provider)
        .await
        .unwrap();
    engine
        .appointments
        .update_status(booking.appointment.id, AppointmentStatus::Completed, provider)
        .await
        .unwrap();

    let err = engine
        .appointments
        .update_appointment(
            booking.appointment.id,
            &AppointmentUpdate {
                start_time: Some(at(18, 13, 0)),
                ..Default::default()
            },
            provider,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));

    let noted = engine
        .appointments
        .update_appointment(
            booking.appointment.id,
            &AppointmentUpdate {
                details: AppointmentDetailsUpdate {
                    notes: Some("Discussed coping plan".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
            provider,
        )
        .await
        .unwrap();
    assert_eq!(noted.notes.as_deref(), Some("Discussed coping plan"));
}

#[tokio::test]
async fn test_missing_appointment_is_not_found() {
    let (_store, engine) = setup(fast_config());
    let id = Uuid::new_v4();

    let err = engine.appointments.get_appointment(id).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { resource: "appointment", .. }));
    let err = engine
        .appointments
        .update_status(id, AppointmentStatus::Completed, id)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { .. }));
    let err = engine.appointments.remove_appointment(id, id).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { .. }));
}

#[tokio::test]
async fn test_list_appointments_filters_and_searches() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    let client = Uuid::new_v4();
    let intake = CreateAppointmentRequest::new(
        client,
        at(22, 9, 0),
        AppointmentDetails::new("intake", 60).with_title("Initial assessment"),
    )
    .with_provider(provider);
    engine.appointments.create_single(&intake, provider).await.unwrap();
    engine
        .appointments
        .create_single(&therapy(client, provider, at(23, 9, 0)), provider)
        .await
        .unwrap();
    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(24, 9, 0)), provider)
        .await
        .unwrap();

    let for_client = engine
        .appointments
        .list_appointments(&AppointmentQuery {
            client_id: Some(client),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_client.len(), 2);
    assert!(for_client[0].start_time < for_client[1].start_time);

    let searched = engine
        .appointments
        .list_appointments(&AppointmentQuery {
            search: Some("ASSESSMENT".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(searched.len(), 1);

    let ranged = engine
        .appointments
        .list_appointments(&AppointmentQuery {
            provider_id: Some(provider),
            start_date: Some(at(23, 9, 0)),
            end_date: Some(at(24, 9, 0)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ranged.len(), 2);
}

// ============================================================================
// Concurrency, retries and timeouts
// ============================================================================

#[tokio::test]
async fn test_concurrent_double_booking_admits_exactly_one() {
    let (store, engine) = setup(fast_config());
    // Both transactions read before either commits
    store.faults().set_latency(std::time::Duration::from_millis(20));
    let provider = Uuid::new_v4();

    let first_request = therapy(Uuid::new_v4(), provider, at(25, 14, 0));
    let second_request = therapy(Uuid::new_v4(), provider, at(25, 14, 30));
    let (first, second) = tokio::join!(
        engine.appointments.create_single(&first_request, provider),
        engine.appointments.create_single(&second_request, provider),
    );

    let outcomes = [first, second];
    let booked = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(SchedulingError::Conflict { .. })))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(store.appointments().len(), 1);
    println!("✅ Concurrent bookings serialized");
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    store.faults().fail_commits(2);

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(26, 9, 0)), provider)
        .await
        .unwrap();
    assert_eq!(store.appointments().len(), 1);
    assert_eq!(store.committed_writes(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_is_transaction_failed() {
    let (store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();
    store.faults().fail_commits(10);

    let err = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(26, 9, 0)), provider)
        .await
        .unwrap_err();
    match err {
        SchedulingError::TransactionFailed { operation, attempts, .. } => {
            assert_eq!(operation, "create_single");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected transaction failure, got {other:?}"),
    }
    assert!(store.appointments().is_empty());
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let config = SchedulingConfig {
        transaction: TransactionPolicy {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
            timeout_ms: 30,
            backoff: BackoffStrategy::Fixed,
        },
        ..SchedulingConfig::default()
    };
    let (store, engine) = setup(config);
    store.faults().set_latency(std::time::Duration::from_millis(200));
    let provider = Uuid::new_v4();

    let err = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(26, 9, 0)), provider)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Timeout { timeout_ms: 30, .. }));
    assert_eq!(err.kind(), "timeout");
    assert!(store.appointments().is_empty());
}

// ============================================================================
// Collaborators
// ============================================================================

struct ChannelSink {
    sent: mpsc::UnboundedSender<(Uuid, String, String)>,
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, user_id: Uuid, message: &str, link: &str) -> std::result::Result<(), CollaboratorError> {
        self.sent
            .send((user_id, message.to_string(), link.to_string()))
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }

    async fn unread_count(&self, _user_id: Uuid) -> std::result::Result<u64, CollaboratorError> {
        Ok(0)
    }
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify(&self, _user_id: Uuid, _message: &str, _link: &str) -> std::result::Result<(), CollaboratorError> {
        Err(CollaboratorError::Unavailable("connection refused".into()))
    }

    async fn unread_count(&self, _user_id: Uuid) -> std::result::Result<u64, CollaboratorError> {
        Err(CollaboratorError::Unavailable("connection refused".into()))
    }
}

struct CountingProvisioner {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl VideoMeetingProvisioner for CountingProvisioner {
    async fn create_meeting(&self, _request: &MeetingRequest) -> std::result::Result<Option<MeetingLink>, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(CollaboratorError::Rejected("quota exceeded".into()));
        }
        Ok(Some(MeetingLink {
            meeting_id: format!("meeting-{call}"),
            join_link: format!("https://video.example.org/j/{call}"),
        }))
    }
}

#[tokio::test]
async fn test_provider_is_notified_after_booking() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_store, engine) = setup(fast_config());
    let engine = engine.map_appointments(|m| m.with_notification_sink(Arc::new(ChannelSink { sent: tx })));
    let provider = Uuid::new_v4();

    let booking = engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(29, 9, 0)), provider)
        .await
        .unwrap();

    let (user, message, link) = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user, provider);
    assert!(message.starts_with("New appointment scheduled for 2024-01-29"));
    assert_eq!(link, appointment_link(booking.appointment.id));
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_booking() {
    let (store, engine) = setup(fast_config());
    let engine = engine.map_appointments(|m| m.with_notification_sink(Arc::new(FailingSink)));
    let provider = Uuid::new_v4();

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(29, 11, 0)), provider)
        .await
        .unwrap();
    assert_eq!(store.appointments().len(), 1);
}

#[tokio::test]
async fn test_telehealth_series_shares_one_meeting() {
    let provisioner = Arc::new(CountingProvisioner {
        calls: AtomicU32::new(0),
        fail: false,
    });
    let (store, engine) = setup(fast_config());
    let engine = engine.map_appointments(|m| m.with_meeting_provisioner(provisioner.clone()));
    let provider = Uuid::new_v4();

    let request = CreateAppointmentRequest::new(
        Uuid::new_v4(),
        at(1, 0, 0),
        AppointmentDetails::new("therapy", 50).with_telehealth(true),
    )
    .with_provider(provider)
    .recurring(weekly_wednesdays(at(31, 23, 59)));
    let series = engine.appointments.create_recurring(&request, provider).await.unwrap();

    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    assert!(series
        .appointments
        .iter()
        .all(|a| a.meeting_id.as_deref() == Some("meeting-1")));
    assert!(store.appointments().iter().all(|a| a.join_link.is_some()));

    // Regenerated instances keep the series meeting
    let update = UpdateSeriesRequest {
        pattern: RecurrencePattern::Weekly,
        time_slots: vec![TimeSlot::weekly(4, "15:00")],
        business_days_only: false,
        end_date: None,
        anchor: at(15, 0, 0),
        overrides: AppointmentDetailsUpdate::default(),
    };
    let edited = engine
        .appointments
        .update_series(series.rule.id, &update, provider)
        .await
        .unwrap();
    assert!(!edited.appointments.is_empty());
    assert!(edited
        .appointments
        .iter()
        .all(|a| a.meeting_id.as_deref() == Some("meeting-1")));
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_meeting_failure_keeps_booking_without_link() {
    let provisioner = Arc::new(CountingProvisioner {
        calls: AtomicU32::new(0),
        fail: true,
    });
    let (store, engine) = setup(fast_config());
    let engine = engine.map_appointments(|m| m.with_meeting_provisioner(provisioner.clone()));
    let provider = Uuid::new_v4();

    let request = CreateAppointmentRequest::new(
        Uuid::new_v4(),
        at(30, 16, 0),
        AppointmentDetails::new("therapy", 50).with_telehealth(true),
    )
    .with_provider(provider);
    let booking = engine.appointments.create_single(&request, provider).await.unwrap();

    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    assert!(booking.appointment.join_link.is_none());
    assert_eq!(store.appointments().len(), 1);
}

#[tokio::test]
async fn test_in_person_booking_skips_meeting_provisioning() {
    let provisioner = Arc::new(CountingProvisioner {
        calls: AtomicU32::new(0),
        fail: false,
    });
    let (_store, engine) = setup(fast_config());
    let engine = engine.map_appointments(|m| m.with_meeting_provisioner(provisioner.clone()));
    let provider = Uuid::new_v4();

    engine
        .appointments
        .create_single(&therapy(Uuid::new_v4(), provider, at(30, 9, 0)), provider)
        .await
        .unwrap();
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Waitlist and availability through the engine
// ============================================================================

#[tokio::test]
async fn test_waitlist_is_served_by_priority() {
    let (_store, engine) = setup(fast_config());
    let request = |priority: Option<i32>| CreateWaitlistRequest {
        client_id: Uuid::new_v4(),
        provider_id: None,
        preferred_date: NaiveDate::from_ymd_opt(2024, 2, 5).unwrap(),
        preferred_time_start: Some("9:00".into()),
        preferred_time_end: Some("12:00".into()),
        appointment_type: "therapy".into(),
        notes: None,
        priority,
    };

    let routine = engine.waitlist.create_entry(request(None)).await.unwrap();
    let urgent = engine.waitlist.create_entry(request(Some(5))).await.unwrap();
    assert_eq!(routine.priority, DEFAULT_WAITLIST_PRIORITY);
    assert_eq!(routine.preferred_time_start.as_deref(), Some("09:00"));

    let open = engine.waitlist.open_entries().await.unwrap();
    assert_eq!(open.iter().map(|e| e.id).collect::<Vec<_>>(), vec![urgent.id, routine.id]);

    engine.waitlist.fulfill(urgent.id).await.unwrap();
    let open = engine.waitlist.open_entries().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, routine.id);
}

#[tokio::test]
async fn test_provider_schedules_are_ordered_by_weekday() {
    let (_store, engine) = setup(fast_config());
    let provider = Uuid::new_v4();

    engine
        .availability
        .create_schedule(CreateProviderScheduleRequest::new(provider, 3, "09:00", "17:00"))
        .await
        .unwrap();
    engine
        .availability
        .create_schedule(CreateProviderScheduleRequest::new(provider, 1, "08:00", "12:00").with_break("10:00", "10:15"))
        .await
        .unwrap();

    let schedules = engine.availability.schedules(Some(provider)).await.unwrap();
    assert_eq!(schedules.iter().map(|s| s.day_of_week).collect::<Vec<_>>(), vec![1, 3]);

    let err = engine
        .availability
        .create_schedule(CreateProviderScheduleRequest::new(provider, 2, "17:00", "09:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));

    let day_off = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
    engine
        .availability
        .create_exception(NewScheduleException::unavailable(provider, day_off, Some("Training".into())))
        .await
        .unwrap();
    let exceptions = engine.availability.exceptions(Some(provider)).await.unwrap();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].is_unavailable);
}
