mod common;

use std::{sync::Arc, time::Duration};

use common::MemoryStore;
use tokio::time::Instant;
use trips::{
    error::AppError,
    models::trip::TripStatus,
    services::coordinator::{CancelOutcome, TripCoordinator, TripOutcome},
};

const POLL: Duration = Duration::from_secs(5);

fn setup() -> (Arc<MemoryStore>, TripCoordinator) {
    let store = Arc::new(MemoryStore::new());
    store.add_owner(10, 1);
    let coordinator = TripCoordinator::new(store.clone(), POLL);
    (store, coordinator)
}

#[tokio::test(start_paused = true)]
async fn trip_completes_and_moves_owner() {
    let (store, coordinator) = setup();
    store.add_trip(1, 10, 20, Duration::from_secs(10));

    let started = Instant::now();
    let task = coordinator
        .start_trip(1, 10, Duration::from_secs(10))
        .unwrap();
    assert_eq!(task.trip_id(), 1);
    assert!(coordinator.is_trip_active(1));

    assert_eq!(task.wait().await.unwrap(), TripOutcome::Completed);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed <= Duration::from_secs(10) + POLL);

    assert_eq!(store.trip_status(1), Some(TripStatus::Completed));
    assert_eq!(store.owner_city(10), Some(20));
    assert!(!coordinator.is_trip_active(1));
}

#[tokio::test(start_paused = true)]
async fn detached_trip_still_completes() {
    let (store, coordinator) = setup();
    store.add_trip(1, 10, 20, Duration::from_secs(10));

    drop(coordinator.start_trip(1, 10, Duration::from_secs(10)).unwrap());
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(store.trip_status(1), Some(TripStatus::Completed));
    assert_eq!(coordinator.active_trip_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_trip_keeps_owner_in_place() {
    let (store, coordinator) = setup();
    store.add_trip(2, 10, 20, Duration::from_secs(30));

    let task = coordinator
        .start_trip(2, 10, Duration::from_secs(30))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;

    let cancelled_at = Instant::now();
    assert_eq!(
        coordinator.cancel_trip(2).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert!(!coordinator.is_trip_active(2));

    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
    assert!(cancelled_at.elapsed() < POLL);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.trip_status(2), Some(TripStatus::Cancelled));
    assert_eq!(store.owner_city(10), Some(1));
    // The loop saw the signal after the canceller had already written.
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_final_sleep_wins() {
    let (store, coordinator) = setup();
    store.add_trip(3, 10, 20, Duration::from_secs(10));

    let task = coordinator
        .start_trip(3, 10, Duration::from_secs(10))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(8)).await;

    assert_eq!(
        coordinator.cancel_trip(3).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
    assert_eq!(store.trip_status(3), Some(TripStatus::Cancelled));
    assert_eq!(store.owner_city(10), Some(1));
    assert_eq!(coordinator.active_trip_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn signalled_handle_is_settled_by_the_loop() {
    let (store, coordinator) = setup();
    store.add_trip(4, 10, 20, Duration::from_secs(30));

    let task = coordinator
        .start_trip(4, 10, Duration::from_secs(30))
        .unwrap();
    coordinator.registry().lookup(4).unwrap().cancel();

    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
    assert_eq!(store.trip_status(4), Some(TripStatus::Cancelled));
    assert_eq!(store.saved().len(), 1);
    assert!(!coordinator.is_trip_active(4));
}

#[tokio::test]
async fn cancelling_unknown_trip_is_benign() {
    let (store, coordinator) = setup();

    assert_eq!(
        coordinator.cancel_trip(999).await.unwrap(),
        CancelOutcome::NotActive
    );
    assert!(store.saved().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_completion_does_not_overwrite() {
    let (store, coordinator) = setup();
    store.add_trip(5, 10, 20, Duration::from_secs(5));

    let task = coordinator.start_trip(5, 10, Duration::from_secs(5)).unwrap();
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Completed);

    assert_eq!(
        coordinator.cancel_trip(5).await.unwrap(),
        CancelOutcome::NotActive
    );
    assert_eq!(store.trip_status(5), Some(TripStatus::Completed));
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_duration_completes_immediately() {
    let (store, coordinator) = setup();
    store.add_trip(6, 10, 20, Duration::ZERO);

    let started = Instant::now();
    let task = coordinator.start_trip(6, 10, Duration::ZERO).unwrap();
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Completed);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(store.trip_status(6), Some(TripStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn deleted_trip_is_a_silent_no_op() {
    let (store, coordinator) = setup();
    store.add_trip(7, 10, 20, Duration::from_secs(10));

    let task = coordinator
        .start_trip(7, 10, Duration::from_secs(10))
        .unwrap();
    store.remove_trip(7);

    assert_eq!(task.wait().await.unwrap(), TripOutcome::Completed);
    assert!(store.saved().is_empty());
    assert_eq!(store.owner_city(10), Some(1));
    assert!(!coordinator.is_trip_active(7));
}

#[tokio::test(start_paused = true)]
async fn missing_owner_still_completes_trip() {
    let (store, coordinator) = setup();
    store.add_trip(8, 77, 20, Duration::from_secs(5));

    let task = coordinator.start_trip(8, 77, Duration::from_secs(5)).unwrap();
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Completed);
    assert_eq!(store.trip_status(8), Some(TripStatus::Completed));
    assert_eq!(store.owner_city(77), None);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_surfaces_from_loop() {
    let (store, coordinator) = setup();
    store.add_trip(9, 10, 20, Duration::from_secs(5));
    store.fail_saves(true);

    let task = coordinator.start_trip(9, 10, Duration::from_secs(5)).unwrap();
    let err = task.wait().await.unwrap_err();

    assert!(matches!(err, AppError::Other(_)));
    assert_eq!(store.trip_status(9), Some(TripStatus::InProgress));
    assert!(!coordinator.is_trip_active(9));
}

#[tokio::test(start_paused = true)]
async fn storage_failure_surfaces_from_cancel() {
    let (store, coordinator) = setup();
    store.add_trip(11, 10, 20, Duration::from_secs(30));

    let task = coordinator
        .start_trip(11, 10, Duration::from_secs(30))
        .unwrap();
    store.fail_saves(true);

    assert!(coordinator.cancel_trip(11).await.is_err());
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
    assert!(!coordinator.is_trip_active(11));
}

#[tokio::test(start_paused = true)]
async fn second_start_for_same_trip_is_rejected() {
    let (store, coordinator) = setup();
    store.add_trip(12, 10, 20, Duration::from_secs(30));

    let task = coordinator
        .start_trip(12, 10, Duration::from_secs(30))
        .unwrap();
    let err = coordinator
        .start_trip(12, 10, Duration::from_secs(30))
        .unwrap_err();
    assert!(matches!(err, AppError::TripAlreadyActive(12)));

    coordinator.cancel_trip(12).await.unwrap();
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_run_one_loop() {
    let (store, coordinator) = setup();
    store.add_trip(13, 10, 20, Duration::from_secs(60));
    let barrier = Arc::new(tokio::sync::Barrier::new(8));

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                coordinator.start_trip(13, 10, Duration::from_secs(60))
            })
        })
        .collect();

    let mut started = Vec::new();
    for attempt in attempts {
        if let Ok(task) = attempt.await.unwrap() {
            started.push(task);
        }
    }
    assert_eq!(started.len(), 1);
    assert_eq!(coordinator.active_trip_count(), 1);

    coordinator.cancel_trip(13).await.unwrap();
    let task = started.pop().unwrap();
    assert_eq!(task.wait().await.unwrap(), TripOutcome::Cancelled);
    assert_eq!(store.trip_status(13), Some(TripStatus::Cancelled));
    assert_eq!(coordinator.active_trip_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn resume_restarts_in_progress_trips() {
    let (store, coordinator) = setup();
    store.add_owner(11, 1);
    store.add_owner(12, 1);
    store.add_trip(21, 10, 20, Duration::from_secs(10));
    store.add_trip(22, 11, 30, Duration::ZERO);
    store.add_trip(23, 12, 40, Duration::from_secs(30));
    let tracked = coordinator
        .start_trip(23, 12, Duration::from_secs(30))
        .unwrap();

    assert_eq!(coordinator.resume_in_progress().await.unwrap(), 2);
    assert_eq!(coordinator.registry().active_ids(), vec![21, 22, 23]);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(store.trip_status(21), Some(TripStatus::Completed));
    assert_eq!(store.trip_status(22), Some(TripStatus::Completed));
    assert_eq!(store.owner_city(10), Some(20));
    assert_eq!(store.owner_city(11), Some(30));
    assert_eq!(store.trip_status(23), Some(TripStatus::InProgress));

    assert_eq!(tracked.wait().await.unwrap(), TripOutcome::Completed);
    assert_eq!(store.owner_city(12), Some(40));
}
