use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::auth::Principal;
use crate::error::Result;
use crate::models::{LocationFix, Trip, TripFilter, TripPoint};
use crate::trips::StartTrip;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/trips", get(list_trips))
        .route("/trips/start", post(start_trip))
        .route("/trips/active", get(active_trips))
        .route("/trips/{id}", get(get_trip).delete(delete_trip))
        .route("/trips/{id}/location", post(update_location))
        .route("/trips/{id}/end", post(end_trip))
        .route("/trips/{id}/points", get(trip_points))
}

async fn start_trip(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<StartTrip>,
) -> Result<(StatusCode, Json<Trip>)> {
    let trip = state
        .trips
        .start(principal.organization_id, principal.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn update_location(
    State(state): State<AppState>,
    principal: Principal,
    Path(trip_id): Path<Uuid>,
    Json(fix): Json<LocationFix>,
) -> Result<Json<Trip>> {
    let trip = state.trips.report_location(&principal, trip_id, fix).await?;
    Ok(Json(trip))
}

async fn end_trip(
    State(state): State<AppState>,
    principal: Principal,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>> {
    // only someone who can see the trip may end it
    state.trips.get(&principal, trip_id).await?;
    let trip = state.trips.end(principal.organization_id, trip_id).await?;
    Ok(Json(trip))
}

async fn active_trips(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Trip>>> {
    Ok(Json(state.trips.active(&principal).await?))
}

async fn get_trip(
    State(state): State<AppState>,
    principal: Principal,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>> {
    Ok(Json(state.trips.get(&principal, trip_id).await?))
}

async fn list_trips(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<TripFilter>,
) -> Result<Json<Vec<Trip>>> {
    Ok(Json(state.trips.list(&principal, filter).await?))
}

async fn delete_trip(
    State(state): State<AppState>,
    principal: Principal,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.trips.delete(&principal, trip_id).await?;
    Ok(Json(json!({ "trip_id": trip_id, "deleted": true })))
}

async fn trip_points(
    State(state): State<AppState>,
    principal: Principal,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Vec<TripPoint>>> {
    Ok(Json(state.trips.history(&principal, trip_id).await?))
}
