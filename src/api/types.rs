//! API response types for scalar reads and health, plus the drain query.
//!
//! Request bodies and the collect-set response live in
//! [`crate::sil::protocol`], shared with the client.

use serde::{Deserialize, Serialize};

/// `GET /api/solar` response; `null` until the simulation publishes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarResponse {
    pub solar: Option<f64>,
}

/// `GET /api/ci` response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CiResponse {
    pub ci: Option<f64>,
}

/// `GET /api/battery-soc` response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySocResponse {
    pub battery_soc: Option<f64>,
}

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Query of `GET /sim/collect-set`. A repeated `token` replays the previous
/// drain instead of draining again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectQuery {
    pub token: Option<u64>,
}
