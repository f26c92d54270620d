//! asof server - HTTP access to per-field revision history.
//!
//! Serves the entity types declared in a JSON schema file. Documents live in
//! PostgreSQL; merging, validation and as-of reconstruction are done by
//! asof-engine.

mod config;
mod db;
mod error;
mod handlers;
mod retry;
mod routes;

use crate::config::Config;
use crate::db::PgDocuments;
use crate::retry::RetryPolicy;
use asof_engine::Schema;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub documents: PgDocuments,
    pub schema: Arc<Schema>,
    pub retry: RetryPolicy,
}

/// Build the application router over `state`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asof_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting asof server on {}:{}", config.host, config.port);

    // Load entity schema
    let schema_json = tokio::fs::read_to_string(&config.schema_path).await?;
    let schema = Schema::from_json(&schema_json)?;
    tracing::info!(
        path = %config.schema_path,
        entities = schema.entities.len(),
        "Loaded entity schema"
    );

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Build application state
    let state = AppState {
        documents: PgDocuments::new(pool),
        retry: RetryPolicy::new(config.retry_attempts),
        schema: Arc::new(schema),
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use asof_engine::{EntitySchema, FieldDef, FieldType};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// State whose pool never connects; only paths that fail before touching
    /// the database can be exercised.
    fn test_state() -> AppState {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/asof_test")
            .unwrap();
        let schema = Schema::new(1).with_entity(
            EntitySchema::try_new(
                "accounts",
                vec![
                    FieldDef::plain("owner", FieldType::String).required(),
                    FieldDef::tracked("balance", FieldType::Int),
                ],
            )
            .unwrap(),
        );

        AppState {
            documents: PgDocuments::new(pool),
            retry: RetryPolicy::new(1),
            schema: Arc::new(schema),
        }
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = app(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn bundled_schema_parses() {
        let schema = Schema::from_json(include_str!("../schema.json")).unwrap();
        assert!(schema.entity("accounts").unwrap().field("balance").unwrap().is_tracked());
        assert!(schema.entity("test_entities").is_ok());
    }

    #[tokio::test]
    async fn health_check() {
        let (status, body) = send(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["entityTypes"], json!(["accounts"]));
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() {
        let (status, body) = send(get("/collections/ghosts/entities/a")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "entity type not found: ghosts");
    }

    #[tokio::test]
    async fn create_rejects_unknown_fields() {
        let request = json_request(
            "POST",
            "/collections/accounts/entities",
            json!({"version": 1, "fields": {"owner": "Alice", "colour": "red"}}),
        );
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown field: colour");
    }

    #[tokio::test]
    async fn create_rejects_missing_required_field() {
        let request = json_request(
            "POST",
            "/collections/accounts/entities",
            json!({"version": 1, "fields": {"balance": 5}}),
        );
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_rejects_wrong_types() {
        let request = json_request(
            "PUT",
            "/collections/accounts/entities/a",
            json!({"version": 2, "fields": {"owner": "Alice", "balance": "lots"}}),
        );
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("balance"));
    }

    #[tokio::test]
    async fn update_rejects_mismatched_ids() {
        let request = json_request(
            "PUT",
            "/collections/accounts/entities/a",
            json!({"id": "b", "version": 2, "fields": {"owner": "Alice"}}),
        );
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_rejects_filters_on_tracked_fields() {
        let (status, body) =
            send(get("/collections/accounts/entities?field=balance&value=5")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("tracked"));
    }

    #[tokio::test]
    async fn list_rejects_empty_pages() {
        let (status, _) = send(get("/collections/accounts/entities?size=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn version_must_be_an_integer() {
        let (status, _) = send(get("/collections/accounts/entities/a?version=yesterday")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
