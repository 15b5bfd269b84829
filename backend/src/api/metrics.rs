use axum::{extract::State, response::IntoResponse};

use crate::api::AppState;

/// Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = match &state.metrics {
        Some(handle) => handle.render(),
        // No recorder installed (tests, embedded use)
        None => format!(
            "# HELP udpchat_info udpchat backend info\n# TYPE udpchat_info gauge\nudpchat_info{{version=\"{}\"}} 1\n",
            env!("CARGO_PKG_VERSION")
        ),
    };

    ([("content-type", "text/plain; charset=utf-8")], body)
}
