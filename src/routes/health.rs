use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::SecondsFormat;
use std::collections::HashMap;

use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    status: &'static str,
    authenticated: bool,
    influx_connected: bool,
    last_update: Option<String>,
    api_calls_24h: u64,
    intervals: IntervalsResponse,
    last_run: HashMap<&'static str, i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IntervalsResponse {
    weather: u64,
    rooms: u64,
    heat_pump: u64,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.poller.snapshot();
    let influx_connected = state.influx.check_health().await;
    Json(HealthResponse {
        status: "UP",
        authenticated: state.tado.is_authenticated(),
        influx_connected,
        last_update: snapshot
            .last_update
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        api_calls_24h: snapshot.api_calls,
        intervals: IntervalsResponse {
            weather: snapshot.intervals.weather_ms,
            rooms: snapshot.intervals.rooms_ms,
            heat_pump: snapshot.intervals.heat_pump_ms,
        },
        last_run: snapshot
            .last_run
            .iter()
            .map(|(category, millis)| (category.as_str(), *millis))
            .collect(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
