use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::product,
    events::{self, EventSender},
    gateway::{PaymentGateway, SandboxGateway},
    handlers::AppServices,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an
/// in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    sandbox: Arc<SandboxGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_gateway_secret_0123456789".to_string(),
            "127.0.0.1".to_string(),
            18_080,
        );
        // A single pooled connection keeps the in-memory database alive and
        // shared for the whole test.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let sandbox = Arc::new(SandboxGateway::new(cfg.gateway_secret.clone()));
        let gateway: Arc<dyn PaymentGateway> = sandbox.clone();

        let services = AppServices::new(db_arc.clone(), event_sender.clone(), gateway, &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            sandbox,
            _event_task: event_task,
        }
    }

    /// Insert a catalog product directly; the pipeline only reads products.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category: Set("general".to_string()),
            description: Set(None),
            price: Set(price),
            stock: Set(stock),
            images: Set(json!([])),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product")
    }

    /// Produce a capture callback for a gateway order the way the sandbox
    /// gateway would sign it.
    #[allow(dead_code)]
    pub fn simulate_capture(&self, gateway_order_id: &str) -> (String, String) {
        self.sandbox.simulate_capture(gateway_order_id)
    }

    /// Send a request against the router, optionally acting as `user_id`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<Uuid>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests carrying a user identity.
    pub async fn request_as(
        &self,
        method: Method,
        uri: &str,
        user_id: Uuid,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, Some(user_id), body).await
    }
}
