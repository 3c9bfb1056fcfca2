use std::sync::Arc;

use axum::{
    extract::Path,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::Value;

use resources::models::{ApiBody, ApiError, HandlerResult};

use crate::simulator::Simulator;

pub struct AgentState {
    pub simulator: Simulator,
    pub uav_id: String,
    pub node_name: String,
    pub node_ip: String,
}

pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/gps", get(gps))
        .route("/api/v1/attitude", get(attitude))
        .route("/api/v1/battery", get(battery))
        .route("/api/v1/flight", get(flight))
        .route("/api/v1/command/:command", post(command))
        .layer(Extension(state))
}

async fn health(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::new("healthy")
        .field("uav_id", &state.uav_id)
        .field("node_name", &state.node_name)
        .field("node_ip", &state.node_ip)
}

async fn full_state(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::success().field("data", state.simulator.state())
}

async fn gps(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::success().field("data", state.simulator.state().gps)
}

async fn attitude(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::success().field("data", state.simulator.state().attitude)
}

async fn battery(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::success().field("data", state.simulator.state().battery)
}

async fn flight(Extension(state): Extension<Arc<AgentState>>) -> ApiBody {
    ApiBody::success().field("data", state.simulator.state().flight)
}

async fn command(
    Extension(state): Extension<Arc<AgentState>>,
    Path(command): Path<String>,
    body: Option<Json<Value>>,
) -> HandlerResult {
    let body = body.map(|Json(value)| value).unwrap_or(Value::Null);
    let simulator = &state.simulator;

    let message = match command.as_str() {
        "arm" => {
            simulator.arm().map_err(ApiError::bad_request)?;
            "Armed successfully".to_string()
        }
        "disarm" => {
            simulator.disarm();
            "Disarmed successfully".to_string()
        }
        "takeoff" => {
            let altitude = body.get("altitude").and_then(Value::as_f64).unwrap_or(50.0);
            simulator.take_off(altitude).map_err(ApiError::bad_request)?;
            format!("Taking off to {altitude:.1}m")
        }
        "land" => {
            simulator.land();
            "Landing initiated".to_string()
        }
        "rtl" => {
            simulator.return_to_launch();
            "Returning to launch".to_string()
        }
        "mode" => {
            let mode = body
                .get("mode")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::bad_request("mode is required"))?;
            simulator.set_flight_mode(mode).map_err(ApiError::bad_request)?;
            format!("Flight mode set to {}", mode.to_uppercase())
        }
        other => return Err(ApiError::not_found(format!("unknown command: {other}"))),
    };

    Ok(ApiBody::success().field("message", message))
}
