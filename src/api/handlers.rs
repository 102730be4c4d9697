//! Request handlers for the bridge endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};

use crate::sil::protocol::{BatteryCommand, CollectSet, NodeCommand, PowerMode, Scalar, SimUpdate};

use super::AppState;
use super::error::ApiError;
use super::types::{BatterySocResponse, CiResponse, CollectQuery, HealthResponse, SolarResponse};

/// `GET /health` → 200 + `{"status": "ok"}`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/solar` → latest published solar value or `null`
pub async fn get_solar(State(state): State<Arc<AppState>>) -> Result<Json<SolarResponse>, ApiError> {
    let solar = state.bridge.scalar(Scalar::Solar)?;
    Ok(Json(SolarResponse { solar }))
}

/// `GET /api/ci` → latest published carbon intensity or `null`
pub async fn get_ci(State(state): State<Arc<AppState>>) -> Result<Json<CiResponse>, ApiError> {
    let ci = state.bridge.scalar(Scalar::Ci)?;
    Ok(Json(CiResponse { ci }))
}

/// `GET /api/battery-soc` → latest published state of charge or `null`
pub async fn get_battery_soc(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BatterySocResponse>, ApiError> {
    let battery_soc = state.bridge.scalar(Scalar::BatterySoc)?;
    Ok(Json(BatterySocResponse { battery_soc }))
}

/// `PUT /api/battery` → records the command, echoes it
pub async fn put_battery(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BatteryCommand>, JsonRejection>,
) -> Result<Json<BatteryCommand>, ApiError> {
    let Json(command) = body?;
    state.bridge.set_battery(&command)?;
    Ok(Json(command))
}

/// `PUT /api/nodes/{id}` → validates and records the mode, echoes it
///
/// Unknown modes → 400 and nothing is recorded.
pub async fn put_node(
    State(state): State<Arc<AppState>>,
    node: Result<Path<u32>, PathRejection>,
    body: Result<Json<NodeCommand>, JsonRejection>,
) -> Result<Json<NodeCommand>, ApiError> {
    let Path(node) = node?;
    let Json(command) = body?;
    let mode: PowerMode = command.power_mode.parse()?;
    state.bridge.set_power_mode(node, mode)?;
    Ok(Json(command))
}

/// `PUT /sim/update` → overwrites all scalars, echoes the update
pub async fn put_update(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SimUpdate>, JsonRejection>,
) -> Result<Json<SimUpdate>, ApiError> {
    let Json(update) = body?;
    state.bridge.update(&update)?;
    Ok(Json(update))
}

/// `GET /sim/collect-set[?token=N]` → drains and returns all actuation commands
///
/// Repeating the token of the previous drain replays its batch.
pub async fn get_collect_set(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CollectQuery>, QueryRejection>,
) -> Result<Json<CollectSet>, ApiError> {
    let Query(query) = query?;
    let set = match query.token {
        Some(token) => state.bridge.collect_set_with_token(token)?,
        None => state.bridge.collect_set()?,
    };
    Ok(Json(set))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::sil::Bridge;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Bridge::in_memory()))
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router(Arc::clone(state)).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    fn put(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, json) = send(&state(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn unset_scalar_is_null() {
        let (status, json) = send(&state(), get("/api/ci")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.get("ci").is_some_and(serde_json::Value::is_null));
    }

    #[tokio::test]
    async fn invalid_mode_is_rejected_with_400() {
        let state = state();
        let (status, json) = send(
            &state,
            put("/api/nodes/1", serde_json::json!({ "power_mode": "turbo" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], 400);
        assert!(json["error"].as_str().unwrap().starts_with("turbo is not a valid power mode"));
        assert_eq!(state.bridge.collect_set().unwrap().nodes_power_mode.len(), 0);
    }

    #[tokio::test]
    async fn non_numeric_node_id_is_rejected() {
        let (status, json) = send(
            &state(),
            put("/api/nodes/abc", serde_json::json!({ "power_mode": "normal" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], 400);
        assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn malformed_update_renders_json_error() {
        let (status, json) = send(&state(), put("/sim/update", serde_json::json!({ "solar": 1.0 }))).await;
        assert!(status.is_client_error());
        assert_eq!(json["status"], status.as_u16());
        assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn bad_drain_token_is_rejected() {
        let (status, json) = send(&state(), get("/sim/collect-set?token=soon")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], 400);
    }

    #[tokio::test]
    async fn drain_token_replays_previous_batch() {
        let state = state();
        state.bridge.set_power_mode(3, PowerMode::Normal).unwrap();
        let (_, first) = send(&state, get("/sim/collect-set?token=9")).await;
        let (_, replay) = send(&state, get("/sim/collect-set?token=9")).await;
        assert_eq!(first, replay);
        assert_eq!(first["nodes_power_mode"].as_object().map(|m| m.len()), Some(1));

        let (_, next) = send(&state, get("/sim/collect-set?token=10")).await;
        assert_eq!(next["nodes_power_mode"].as_object().map(|m| m.len()), Some(0));
    }

    #[tokio::test]
    async fn battery_put_echoes_input() {
        let body = serde_json::json!({ "min_soc": 0.3, "grid_charge": 1.5 });
        let (status, json) = send(&state(), put("/api/battery", body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, body);
    }
}
