//! Runs one polling loop per trip and settles each trip exactly once.
//!
//! A trip ends either because its time ran out ([`TripCoordinator::complete_trip`])
//! or because somebody cancelled it ([`TripCoordinator::cancel_trip`]). The two
//! paths race for the trip's [`ActiveTrips`] entry; only the winner writes to
//! the store.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    models::{
        trip::{TripId, TripStatus},
        user::UserId,
    },
    services::{
        registry::{ActiveTrips, Registration},
        store::{ChangeSet, TripStore},
    },
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Nothing was tracked under that id: never started here, or already finished.
    NotActive,
}

/// Handle to a running trip loop.
///
/// Dropping it detaches the loop; it keeps running to the end.
#[derive(Debug)]
pub struct TripTask {
    trip_id: TripId,
    handle: JoinHandle<Result<TripOutcome, AppError>>,
}

impl TripTask {
    pub fn trip_id(&self) -> TripId {
        self.trip_id
    }

    /// Wait for the loop to end and return how the trip ended.
    pub async fn wait(self) -> Result<TripOutcome, AppError> {
        let trip_id = self.trip_id;
        self.handle
            .await
            .map_err(|err| AppError::Other(anyhow::anyhow!("trip {trip_id} loop failed: {err}")))?
    }
}

#[derive(Clone)]
pub struct TripCoordinator {
    store: Arc<dyn TripStore>,
    registry: Arc<ActiveTrips>,
    poll_interval: Duration,
}

impl TripCoordinator {
    pub fn new(store: Arc<dyn TripStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            registry: Arc::new(ActiveTrips::new()),
            poll_interval,
        }
    }

    pub fn registry(&self) -> &ActiveTrips {
        &self.registry
    }

    pub fn is_trip_active(&self, trip_id: TripId) -> bool {
        self.registry.is_active(trip_id)
    }

    pub fn active_trip_count(&self) -> usize {
        self.registry.len()
    }

    /// Start tracking a trip whose record already exists in the store.
    ///
    /// Returns as soon as the loop is spawned. Must be called from within a
    /// tokio runtime.
    pub fn start_trip(
        &self,
        trip_id: TripId,
        owner_id: UserId,
        duration: Duration,
    ) -> Result<TripTask, AppError> {
        let registration = self.registry.register(trip_id)?;
        info!(trip_id, owner_id, seconds = duration.as_secs(), "trip started");

        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            coordinator
                .run_trip(registration, owner_id, duration)
                .await
        });

        Ok(TripTask { trip_id, handle })
    }

    /// Restart loops for every trip the store still has in progress.
    ///
    /// Trips whose end time has already passed complete on the first pass.
    pub async fn resume_in_progress(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let mut resumed = 0;
        for trip in self.store.in_progress_trips().await? {
            match self.start_trip(trip.id, trip.user_id, trip.remaining(now)) {
                Ok(_) => resumed += 1,
                Err(AppError::TripAlreadyActive(trip_id)) => {
                    debug!(trip_id, "trip already tracked, not resuming");
                }
                Err(err) => return Err(err),
            }
        }
        if resumed > 0 {
            info!(resumed, "resumed in-progress trips");
        }
        Ok(resumed)
    }

    async fn run_trip(
        self,
        registration: Registration,
        owner_id: UserId,
        duration: Duration,
    ) -> Result<TripOutcome, AppError> {
        let trip_id = registration.trip_id();
        let _release = ReleaseOnDrop {
            registry: self.registry.clone(),
            registration: registration.clone(),
        };
        let token = registration.token().clone();

        let mut remaining = duration;
        while !remaining.is_zero() {
            if token.is_cancelled() {
                break;
            }

            debug!(
                trip_id,
                owner_id,
                seconds_left = remaining.as_secs(),
                "trip in progress"
            );
            let step = self.poll_interval.min(remaining);
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(step) => {
                    remaining = remaining.saturating_sub(step);
                }
            }
        }

        if token.is_cancelled() {
            // `cancel_trip` takes the entry before signalling, so only a bare
            // signal on the handle leaves it for us to claim.
            if self.registry.claim(&registration) {
                info!(trip_id, owner_id, "trip cancellation signalled");
                self.record_cancellation(trip_id).await.inspect_err(|err| {
                    error!(trip_id, "failed to record trip cancellation: {err}");
                })?;
            } else {
                debug!(trip_id, owner_id, "trip loop stopped by canceller");
            }
            return Ok(TripOutcome::Cancelled);
        }

        if !self.registry.claim(&registration) {
            // A canceller took the entry after our last check.
            info!(trip_id, owner_id, "trip was cancelled before it could complete");
            return Ok(TripOutcome::Cancelled);
        }

        self.complete_trip(trip_id).await.inspect_err(|err| {
            error!(trip_id, "failed to record trip completion: {err}");
        })?;
        info!(trip_id, owner_id, status = %TripStatus::Completed, "trip settled");
        Ok(TripOutcome::Completed)
    }

    /// Mark a trip completed and move its owner to the destination.
    ///
    /// A trip or owner that no longer exists is skipped silently.
    pub async fn complete_trip(&self, trip_id: TripId) -> Result<(), AppError> {
        let Some(trip) = self.store.find_trip(trip_id).await? else {
            warn!(trip_id, "trip record disappeared before completion");
            return Ok(());
        };

        let mut changes = ChangeSet::new().finish_trip(trip.id, TripStatus::Completed);
        match self.store.find_owner(trip.user_id).await? {
            Some(owner) => {
                changes = changes.move_owner(owner.id, trip.destination_city_id);
            }
            None => warn!(trip_id, owner_id = trip.user_id, "trip owner no longer exists"),
        }

        self.store.save_changes(changes).await
    }

    /// Cancel a tracked trip.
    ///
    /// Cancelling an id that is not tracked is not an error; it reports
    /// [`CancelOutcome::NotActive`] and touches nothing.
    pub async fn cancel_trip(&self, trip_id: TripId) -> Result<CancelOutcome, AppError> {
        let Some(token) = self.registry.take(trip_id) else {
            info!(trip_id, "trip not found or already finished");
            return Ok(CancelOutcome::NotActive);
        };
        token.cancel();

        self.record_cancellation(trip_id).await?;
        Ok(CancelOutcome::Cancelled)
    }

    async fn record_cancellation(&self, trip_id: TripId) -> Result<(), AppError> {
        if self.store.find_trip(trip_id).await?.is_none() {
            warn!(trip_id, "trip record disappeared before cancellation");
            return Ok(());
        }

        let status = TripStatus::Cancelled;
        self.store
            .save_changes(ChangeSet::new().finish_trip(trip_id, status))
            .await?;
        info!(trip_id, status = %status, "trip settled");
        Ok(())
    }
}

struct ReleaseOnDrop {
    registry: Arc<ActiveTrips>,
    registration: Registration,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if self.registry.claim(&self.registration) {
            debug!(trip_id = self.registration.trip_id(), "released trip registration");
        }
    }
}
