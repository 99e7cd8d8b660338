use std::collections::HashMap;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        city::{City, CityId},
        user::{NewUser, User, UserId},
    },
    services::store::TripStore,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_user).get(users_within_radius))
        .route("/users/:id", get(user_detail))
        .route("/auth/login", post(login))
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    username: String,
    password: String,
    city_id: CityId,
}

async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let name = request.name.trim();
    if name.chars().count() <= 2 {
        return Err(AppError::BadRequest(
            "name must be longer than 2 characters".into(),
        ));
    }
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(AppError::BadRequest(
            "username and password are required".into(),
        ));
    }
    if state.store.find_user_by_username(username).await?.is_some() {
        return Err(AppError::BadRequest(
            "user with this username already exists".into(),
        ));
    }
    state
        .store
        .find_city(request.city_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let user = state
        .store
        .create_user(NewUser {
            name: name.to_string(),
            username: username.to_string(),
            password_hash: hash_password(&request.password)?,
            city_id: request.city_id,
        })
        .await?;
    info!(user_id = user.id, "user registered");

    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub city: Option<City>,
}

async fn user_detail(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserView>, AppError> {
    let user = state
        .store
        .find_owner(user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let city = state.store.find_city(user.city_id).await?;

    Ok(Json(UserView {
        id: user.id,
        name: user.name,
        username: user.username,
        city,
    }))
}

#[derive(Deserialize)]
struct RadiusQuery {
    lat: f64,
    lon: f64,
    /// Kilometres.
    r: f64,
}

/// Users whose current city lies within `r` km of the given point.
async fn users_within_radius(
    State(state): State<AppState>,
    Query(query): Query<RadiusQuery>,
) -> Result<Json<Vec<UserView>>, AppError> {
    if !City::coordinates_valid(query.lat, query.lon) {
        return Err(AppError::BadRequest("invalid coordinates".into()));
    }
    if !query.r.is_finite() || query.r < 0.0 {
        return Err(AppError::BadRequest("radius must be a non-negative number".into()));
    }

    let cities: HashMap<CityId, City> = state
        .store
        .list_cities()
        .await?
        .into_iter()
        .map(|city| (city.id, city))
        .collect();

    let nearby = state
        .store
        .list_users()
        .await?
        .into_iter()
        .filter_map(|user| {
            let city = cities.get(&user.city_id)?;
            (city.distance_km(query.lat, query.lon) <= query.r).then(|| UserView {
                id: user.id,
                name: user.name,
                username: user.username,
                city: Some(city.clone()),
            })
        })
        .collect();

    Ok(Json(nearby))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<User>, AppError> {
    let Some(user) = state
        .store
        .find_user_by_username(request.username.trim())
        .await?
    else {
        return Err(AppError::Unauthorized);
    };

    if !verify_password(&request.password, &user.password_hash)? {
        warn!(user_id = user.id, "login rejected");
        return Err(AppError::Unauthorized);
    }
    info!(user_id = user.id, "user logged in");
    Ok(Json(user))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AppError> {
    let hash = PasswordHash::new(stored)
        .map_err(|err| AppError::Other(anyhow::anyhow!("stored password hash is invalid: {err}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .is_ok())
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AppError::Other(anyhow::anyhow!("password hashing failed: {err}")))?;
    Ok(hash.to_string())
}
