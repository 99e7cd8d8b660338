use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio_util::sync::CancellationToken;

use crate::{error::AppError, models::trip::TripId};

struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<TripId, Entry>,
    next_generation: u64,
}

/// Proof that a trip was registered, held by the loop that runs it.
#[derive(Debug, Clone)]
pub struct Registration {
    trip_id: TripId,
    generation: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn trip_id(&self) -> TripId {
        self.trip_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Trips that currently have a running loop, keyed by trip id.
///
/// All operations go through one lock. Removal is exactly-once: whichever of
/// [`ActiveTrips::take`], [`ActiveTrips::claim`] or [`ActiveTrips::unregister`]
/// gets to an entry first removes it, every later call sees it as gone.
#[derive(Default)]
pub struct ActiveTrips {
    inner: Mutex<Inner>,
}

impl ActiveTrips {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new trip. Fails if the id is already tracked.
    pub fn register(&self, trip_id: TripId) -> Result<Registration, AppError> {
        let mut inner = self.lock();
        if inner.entries.contains_key(&trip_id) {
            return Err(AppError::TripAlreadyActive(trip_id));
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let token = CancellationToken::new();
        inner.entries.insert(
            trip_id,
            Entry {
                generation,
                token: token.clone(),
            },
        );

        Ok(Registration {
            trip_id,
            generation,
            token,
        })
    }

    pub fn lookup(&self, trip_id: TripId) -> Option<CancellationToken> {
        self.lock()
            .entries
            .get(&trip_id)
            .map(|entry| entry.token.clone())
    }

    /// Remove the entry for `trip_id`, returning whether one was present.
    pub fn unregister(&self, trip_id: TripId) -> bool {
        self.lock().entries.remove(&trip_id).is_some()
    }

    pub fn is_active(&self, trip_id: TripId) -> bool {
        self.lock().entries.contains_key(&trip_id)
    }

    /// Look up and remove in one step.
    pub fn take(&self, trip_id: TripId) -> Option<CancellationToken> {
        self.lock()
            .entries
            .remove(&trip_id)
            .map(|entry| entry.token)
    }

    /// Remove the entry only if it still belongs to `registration`.
    ///
    /// Returns `false` when someone else already removed it, or when the id
    /// has since been registered again.
    pub fn claim(&self, registration: &Registration) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(&registration.trip_id) {
            Some(entry) if entry.generation == registration.generation => {
                inner.entries.remove(&registration.trip_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_ids(&self) -> Vec<TripId> {
        let mut ids: Vec<TripId> = self.lock().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
