//! Registration and roster endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    Json,
};

use crate::api::AppState;
use crate::clocksync::now_millis;
use crate::error::AppResult;
use crate::models::Member;
use crate::registry::RegisterRequest;

/// `GET /register?username=..&ip=..&port=..`
///
/// Responds with the members known before this registration, never including
/// the caller.
pub async fn register(
    State(state): State<AppState>,
    Query(request): Query<RegisterRequest>,
) -> AppResult<Json<Vec<Member>>> {
    let mut registry = state.registry.write().await;
    let others = registry.register(&request, now_millis())?;

    metrics::increment_counter!("udpchat_registrations_total");
    metrics::gauge!("udpchat_members", registry.len() as f64);

    Ok(Json(others))
}

/// `GET /list` - human-readable roster
pub async fn list(State(state): State<AppState>) -> Html<String> {
    let members = state.registry.read().await.snapshot();
    Html(render_roster(&members))
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 Not found")
}

fn render_roster(members: &[Member]) -> String {
    let mut html = String::from("<html><body><h1>Active chat members</h1>");
    for member in members {
        html.push_str(&format!(
            "<p><strong>User:</strong> {} <strong>IP:</strong> {} <strong>Port:</strong> {} <strong>Registered:</strong> {}</p>",
            escape(&member.username),
            escape(&member.ip),
            member.port,
            member.registered_at(),
        ));
    }
    html.push_str("</body></html>");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_lists_every_member() {
        let html = render_roster(&[
            Member::new("alice", "127.0.0.1", 4000, 0),
            Member::permanent("server", "0.0.0.0", 8082),
        ]);
        assert!(html.contains("Active chat members"));
        assert!(html.contains("alice"));
        assert!(html.contains("8082"));
        assert!(html.contains("never expires"));
    }

    #[test]
    fn test_roster_escapes_usernames() {
        let html = render_roster(&[Member::new("<script>", "127.0.0.1", 4000, 0)]);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
