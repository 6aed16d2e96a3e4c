use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use super::handlers::{
    health_handler, latest_handler, latest_sample_handler, samples_handler, servers_handler,
    status_handler, AppState,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/servers", get(servers_handler))
        .route("/api/latest", get(latest_handler))
        .route("/api/servers/{address}", get(samples_handler))
        .route("/api/servers/{address}/latest", get(latest_sample_handler))
        .route("/api/servers/{address}/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::DateTime;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::adapters::MemoryStore;
    use crate::application::{SchedulerStats, ServerQueries};
    use crate::domain::{Endpoint, Sample};
    use crate::ports::SampleStore;

    async fn seeded_router(max_limit: usize) -> Router {
        let store = Arc::new(MemoryStore::with_default_retention());
        let alpha = Endpoint::parse("alpha.example").unwrap();
        let beta = Endpoint::parse("beta.example:25570").unwrap();

        for secs in 1..=5 {
            let sample = Sample::new(alpha.clone(), DateTime::from_timestamp(secs, 0).unwrap())
                .with_metrics(Some(secs as u32), Some(20));
            store.append_sample(&sample, Some("data:image/png;base64,AA==")).await.unwrap();
        }
        let failed = Sample::new(beta, DateTime::from_timestamp(3, 0).unwrap());
        store.append_sample(&failed, None).await.unwrap();

        create_router(AppState {
            queries: ServerQueries::new(store),
            stats: Arc::new(SchedulerStats::default()),
            default_limit: 3,
            max_limit,
        })
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(seeded_router(10).await, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cycles"], 0);
    }

    #[tokio::test]
    async fn test_servers_sorted() {
        let (status, body) = get_json(seeded_router(10).await, "/api/servers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["alpha.example", "beta.example:25570"]));
    }

    #[tokio::test]
    async fn test_latest_per_server() {
        let (_, body) = get_json(seeded_router(10).await, "/api/latest").await;
        let latest = body.as_array().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0]["endpoint"], "alpha.example");
        assert_eq!(latest[0]["observed_at"], 5);
        assert_eq!(latest[0]["player_count"], 5);
        assert_eq!(latest[1]["player_count"], Value::Null);
        assert_eq!(latest[1]["latency_ms"], Value::Null);
    }

    #[tokio::test]
    async fn test_samples_default_and_clamped_limit() {
        let (_, body) = get_json(seeded_router(4).await, "/api/servers/alpha.example").await;
        let times: Vec<i64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["observed_at"].as_i64().unwrap())
            .collect();
        assert_eq!(times, vec![5, 4, 3]);

        let (_, body) = get_json(seeded_router(4).await, "/api/servers/alpha.example?limit=100").await;
        assert_eq!(body.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_server_is_empty() {
        let (status, body) = get_json(seeded_router(10).await, "/api/servers/nobody.example").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_latest_sample_for_server() {
        let (status, body) = get_json(seeded_router(10).await, "/api/servers/alpha.example/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["observed_at"], 5);
        assert_eq!(body["player_count"], 5);

        let (status, _) = get_json(seeded_router(10).await, "/api/servers/nobody.example/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body) = get_json(seeded_router(10).await, "/api/servers/alpha.example/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ping"], 20);
        assert_eq!(body["logo"], "data:image/png;base64,AA==");

        let (status, body) =
            get_json(seeded_router(10).await, "/api/servers/beta.example:25570/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ping"], Value::Null);

        let (status, body) = get_json(seeded_router(10).await, "/api/servers/nobody.example/status").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nobody.example"));
    }
}
