use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        city::{City, CityId},
        trip::{NewTrip, Trip, TripId, TripStatus},
        user::{NewUser, User, UserId},
    },
};

/// A single persisted mutation, applied as part of a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Move a trip out of `InProgress`. Trips already in a terminal state are left alone.
    FinishTrip { trip_id: TripId, status: TripStatus },
    /// Update an owner's current city.
    MoveOwner { user_id: UserId, city_id: CityId },
}

/// Changes that must land together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish_trip(mut self, trip_id: TripId, status: TripStatus) -> Self {
        self.changes.push(Change::FinishTrip { trip_id, status });
        self
    }

    pub fn move_owner(mut self, user_id: UserId, city_id: CityId) -> Self {
        self.changes.push(Change::MoveOwner { user_id, city_id });
        self
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Durable trip records, as seen by the trip coordinator.
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, AppError>;

    async fn find_owner(&self, user_id: UserId) -> Result<Option<User>, AppError>;

    /// Apply every change in one transaction.
    ///
    /// Rows that no longer exist are skipped. If a `FinishTrip` finds its trip
    /// missing or already terminal, the whole set is discarded.
    async fn save_changes(&self, changes: ChangeSet) -> Result<(), AppError>;

    async fn in_progress_trips(&self) -> Result<Vec<Trip>, AppError>;
}

const TRIP_COLUMNS: &str =
    "id, user_id, destination_city_id, start_time, end_time, status, cancellation_token";
const USER_COLUMNS: &str = "id, name, username, password_hash, city_id, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

// `INSERT ... RETURNING` is always read with `fetch_all`. On sqlite the implicit
// transaction only commits once the statement is stepped to completion; until
// then other pool connections cannot see the row.
impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert a trip unless the owner already has one in progress.
    ///
    /// Returns `None` when the owner is busy. The check and the insert are a
    /// single statement so two racing requests cannot both succeed.
    pub async fn create_trip(&self, trip: NewTrip) -> Result<Option<Trip>, AppError> {
        let inserted = sqlx::query_as::<_, Trip>(&format!(
            r#"INSERT INTO trips (user_id, destination_city_id, start_time, end_time, status, cancellation_token)
               SELECT ?1, ?2, ?3, ?4, ?5, ?6
               WHERE NOT EXISTS (SELECT 1 FROM trips WHERE user_id = ?1 AND status = ?5)
               RETURNING {TRIP_COLUMNS}"#
        ))
        .bind(trip.user_id)
        .bind(trip.destination_city_id)
        .bind(trip.start_time)
        .bind(trip.end_time)
        .bind(TripStatus::InProgress)
        .bind(&trip.cancellation_token)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .next();

        if let Some(trip) = &inserted {
            debug!(trip_id = trip.id, owner_id = trip.user_id, "trip record created");
        }
        Ok(inserted)
    }

    pub async fn find_active_trip_by_token(&self, token: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE cancellation_token = ?1 AND status = ?2"
        ))
        .bind(token)
        .bind(TripStatus::InProgress)
        .fetch_optional(&self.db)
        .await?;
        Ok(trip)
    }

    pub async fn create_user(&self, user: NewUser) -> Result<User, AppError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (name, username, password_hash, city_id, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.city_id)
        .bind(Utc::now())
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;
        Ok(created)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn create_city(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<City, AppError> {
        let city = sqlx::query_as::<_, City>(
            "INSERT INTO cities (name, latitude, longitude) VALUES (?1, ?2, ?3) RETURNING id, name, latitude, longitude",
        )
        .bind(name)
        .bind(latitude)
        .bind(longitude)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;
        Ok(city)
    }

    pub async fn find_city(&self, id: CityId) -> Result<Option<City>, AppError> {
        let city = sqlx::query_as::<_, City>(
            "SELECT id, name, latitude, longitude FROM cities WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(city)
    }

    pub async fn list_cities(&self) -> Result<Vec<City>, AppError> {
        let cities = sqlx::query_as::<_, City>(
            "SELECT id, name, latitude, longitude FROM cities ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(cities)
    }
}

#[async_trait]
impl TripStore for SqliteStore {
    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(trip)
    }

    async fn find_owner(&self, user_id: UserId) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn save_changes(&self, changes: ChangeSet) -> Result<(), AppError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        for change in changes.changes() {
            match change {
                Change::FinishTrip { trip_id, status } => {
                    let updated =
                        sqlx::query("UPDATE trips SET status = ?1 WHERE id = ?2 AND status = ?3")
                            .bind(*status)
                            .bind(*trip_id)
                            .bind(TripStatus::InProgress)
                            .execute(&mut *tx)
                            .await?;
                    if updated.rows_affected() == 0 {
                        debug!(
                            trip_id,
                            status = %status,
                            "trip already finished, discarding change set"
                        );
                        tx.rollback().await?;
                        return Ok(());
                    }
                }
                Change::MoveOwner { user_id, city_id } => {
                    sqlx::query("UPDATE users SET city_id = ?1 WHERE id = ?2")
                        .bind(*city_id)
                        .bind(*user_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn in_progress_trips(&self) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE status = ?1 ORDER BY id"
        ))
        .bind(TripStatus::InProgress)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }
}
