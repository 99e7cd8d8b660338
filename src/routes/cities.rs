use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    models::city::{City, CityId},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cities", post(create_city).get(list_cities))
        .route("/cities/:id", get(city_detail))
}

#[derive(Deserialize)]
struct CityRequest {
    name: String,
    latitude: f64,
    longitude: f64,
}

async fn create_city(
    State(state): State<AppState>,
    Json(request): Json<CityRequest>,
) -> Result<(StatusCode, Json<City>), AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("city name is required".into()));
    }
    if !City::coordinates_valid(request.latitude, request.longitude) {
        return Err(AppError::BadRequest("invalid coordinates".into()));
    }

    let city = state
        .store
        .create_city(request.name.trim(), request.latitude, request.longitude)
        .await?;
    Ok((StatusCode::CREATED, Json(city)))
}

async fn list_cities(State(state): State<AppState>) -> Result<Json<Vec<City>>, AppError> {
    Ok(Json(state.store.list_cities().await?))
}

async fn city_detail(
    State(state): State<AppState>,
    Path(city_id): Path<CityId>,
) -> Result<Json<City>, AppError> {
    let city = state
        .store
        .find_city(city_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(city))
}
