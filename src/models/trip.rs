use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{city::CityId, user::UserId};
use crate::error::AppError;

pub type TripId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TripStatus {
    InProgress,
    Cancelled,
    Completed,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TripStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::InProgress => "In Progress",
            TripStatus::Cancelled => "Cancelled",
            TripStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: TripId,
    pub user_id: UserId,
    pub destination_city_id: CityId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: TripStatus,
    #[serde(skip_serializing)]
    pub cancellation_token: String,
}

impl Trip {
    /// Time left until the scheduled end, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.end_time - now).to_std().unwrap_or_default()
    }
}

/// A trip about to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub user_id: UserId,
    pub destination_city_id: CityId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cancellation_token: String,
}

impl NewTrip {
    pub fn starting_now(
        user_id: UserId,
        destination_city_id: CityId,
        duration: Duration,
    ) -> Result<Self, AppError> {
        let duration = chrono::Duration::from_std(duration)
            .map_err(|err| AppError::BadRequest(format!("invalid trip time: {err}")))?;
        let start_time = Utc::now();
        let end_time = start_time
            .checked_add_signed(duration)
            .ok_or_else(|| AppError::BadRequest("invalid trip time: too far in the future".into()))?;
        Ok(Self {
            user_id,
            destination_city_id,
            start_time,
            end_time,
            cancellation_token: uuid::Uuid::new_v4().to_string(),
        })
    }
}
