//! Key pool statistics endpoint

use axum::{extract::State, Json};
use serde_json::{Map, Value};

use crate::server::state::AppState;
use crate::utils::mask_key;

/// Per-key diagnostics, keyed by the masked key
///
/// GET /stats
pub async fn key_stats(State(state): State<AppState>) -> Json<Value> {
    let mut stats = Map::new();
    for snapshot in state.key_pool.snapshot() {
        let masked = mask_key(&snapshot.key);
        let value = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
        stats.insert(masked, value);
    }
    Json(Value::Object(stats))
}
