#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use trips::{
    error::AppError,
    models::{
        city::CityId,
        trip::{Trip, TripId, TripStatus},
        user::{User, UserId},
    },
    services::store::{Change, ChangeSet, TripStore},
};

#[derive(Default, Clone)]
struct Tables {
    trips: HashMap<TripId, Trip>,
    owners: HashMap<UserId, User>,
}

/// In-memory trip store with the same change-set rules as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_saves: AtomicBool,
    saves: Mutex<Vec<ChangeSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_owner(&self, id: UserId, city_id: CityId) {
        let owner = User {
            id,
            name: format!("Traveller {id}"),
            username: format!("traveller{id}"),
            password_hash: String::new(),
            city_id,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().owners.insert(id, owner);
    }

    pub fn add_trip(&self, id: TripId, owner: UserId, destination: CityId, duration: Duration) {
        let start_time = Utc::now();
        let trip = Trip {
            id,
            user_id: owner,
            destination_city_id: destination,
            start_time,
            end_time: start_time + chrono::Duration::from_std(duration).unwrap(),
            status: TripStatus::InProgress,
            cancellation_token: format!("secret-{id}"),
        };
        self.tables.lock().unwrap().trips.insert(id, trip);
    }

    pub fn remove_trip(&self, id: TripId) {
        self.tables.lock().unwrap().trips.remove(&id);
    }

    pub fn trip_status(&self, id: TripId) -> Option<TripStatus> {
        self.tables.lock().unwrap().trips.get(&id).map(|trip| trip.status)
    }

    pub fn owner_city(&self, id: UserId) -> Option<CityId> {
        self.tables
            .lock()
            .unwrap()
            .owners
            .get(&id)
            .map(|owner| owner.city_id)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<ChangeSet> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl TripStore for MemoryStore {
    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, AppError> {
        Ok(self.tables.lock().unwrap().trips.get(&id).cloned())
    }

    async fn find_owner(&self, user_id: UserId) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().unwrap().owners.get(&user_id).cloned())
    }

    async fn save_changes(&self, changes: ChangeSet) -> Result<(), AppError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::Other(anyhow!("disk full")));
        }

        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.clone();
        for change in changes.changes() {
            match change {
                Change::FinishTrip { trip_id, status } => match staged.trips.get_mut(trip_id) {
                    Some(trip) if trip.status == TripStatus::InProgress => trip.status = *status,
                    _ => return Ok(()),
                },
                Change::MoveOwner { user_id, city_id } => {
                    if let Some(owner) = staged.owners.get_mut(user_id) {
                        owner.city_id = *city_id;
                    }
                }
            }
        }
        *tables = staged;
        self.saves.lock().unwrap().push(changes);
        Ok(())
    }

    async fn in_progress_trips(&self) -> Result<Vec<Trip>, AppError> {
        let mut trips: Vec<Trip> = self
            .tables
            .lock()
            .unwrap()
            .trips
            .values()
            .filter(|trip| trip.status == TripStatus::InProgress)
            .cloned()
            .collect();
        trips.sort_by_key(|trip| trip.id);
        Ok(trips)
    }
}
