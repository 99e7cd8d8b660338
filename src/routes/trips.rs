use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::AppError,
    models::{
        city::CityId,
        trip::{NewTrip, TripId, TripStatus},
        user::UserId,
    },
    services::{coordinator::CancelOutcome, store::TripStore},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/cancel", post(cancel_trip))
        .route("/trips/:id", get(trip_status))
}

#[derive(Deserialize)]
struct TripRequest {
    user_id: UserId,
    destination_city_id: CityId,
    /// Seconds.
    trip_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TripCreated {
    pub trip_id: TripId,
    pub cancellation_token: String,
}

async fn create_trip(
    State(state): State<AppState>,
    Json(request): Json<TripRequest>,
) -> Result<Json<TripCreated>, AppError> {
    if request.trip_time == 0 {
        return Err(AppError::BadRequest("trip time must be positive".into()));
    }
    let owner = state
        .store
        .find_owner(request.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    state
        .store
        .find_city(request.destination_city_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let duration = Duration::from_secs(request.trip_time);
    let new_trip = NewTrip::starting_now(owner.id, request.destination_city_id, duration)?;
    let Some(trip) = state.store.create_trip(new_trip).await? else {
        return Err(AppError::BadRequest("user is already on a trip".into()));
    };

    // The loop runs detached; the record is already persisted.
    state.trips.start_trip(trip.id, owner.id, duration)?;

    Ok(Json(TripCreated {
        trip_id: trip.id,
        cancellation_token: trip.cancellation_token,
    }))
}

#[derive(Deserialize)]
struct CancelParams {
    cancellation_token: String,
}

async fn cancel_trip(
    State(state): State<AppState>,
    Query(params): Query<CancelParams>,
) -> Result<Json<&'static str>, AppError> {
    let trip = state
        .store
        .find_active_trip_by_token(&params.cancellation_token)
        .await?
        .ok_or(AppError::NotFound)?;

    match state.trips.cancel_trip(trip.id).await? {
        CancelOutcome::Cancelled => Ok(Json("trip cancelled")),
        CancelOutcome::NotActive => {
            warn!(trip_id = trip.id, "trip is in progress in storage but not tracked");
            Err(AppError::NotFound)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TripStatusView {
    pub trip_id: TripId,
    pub status: TripStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_left: Option<u64>,
}

async fn trip_status(
    State(state): State<AppState>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<TripStatusView>, AppError> {
    let trip = state
        .store
        .find_trip(trip_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let seconds_left =
        (!trip.status.is_terminal()).then(|| trip.remaining(Utc::now()).as_secs());

    Ok(Json(TripStatusView {
        trip_id: trip.id,
        status: trip.status,
        seconds_left,
    }))
}
