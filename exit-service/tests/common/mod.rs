//! Common test utilities for exit-service integration tests.
#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use exit_service::config::{ExitConfig, ReviewConfig};
use exit_service::models::{
    Decision, ExitRequest, ExitRequestDraft, Hall, ProfileRecord, Role,
};
use exit_service::services::MemoryStore;
use exit_service::startup::{build_router, AppState};
use serde_json::Value;
use std::sync::{Arc, Once};
use tower::util::ServiceExt;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,exit_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// In-memory application with one principal per role already provisioned.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub router: Router,
    pub hall: Hall,
    pub other_hall: Hall,
    pub student: Uuid,
    pub hall_admin: Uuid,
    pub security: Uuid,
    pub super_admin: Uuid,
    pub unassigned: Uuid,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_review(ReviewConfig::default()).await
    }

    pub async fn with_review(review: ReviewConfig) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let hall = store.add_hall("Moremi Hall").await;
        let other_hall = store.add_hall("Fagunwa Hall").await;

        let config = ExitConfig {
            review,
            ..ExitConfig::in_memory()
        };
        let state = AppState::new(config, store.clone(), store.clone());
        let router = build_router(state.clone());

        let mut app = Self {
            store,
            state,
            router,
            hall: hall.clone(),
            other_hall,
            student: Uuid::nil(),
            hall_admin: Uuid::nil(),
            security: Uuid::nil(),
            super_admin: Uuid::nil(),
            unassigned: Uuid::nil(),
        };

        app.student = app.add_student("Amaka Eze", Some(&hall)).await;
        app.hall_admin = app
            .add_member("Warden Bello", Some(Role::HallAdmin), Some(&hall))
            .await;
        app.security = app
            .add_member("Officer Musa", Some(Role::Security), None)
            .await;
        app.super_admin = app
            .add_member("Dean Okoro", Some(Role::SuperAdmin), None)
            .await;
        app.unassigned = app.add_member("New Arrival", None, None).await;

        app
    }

    pub async fn add_student(&self, name: &str, hall: Option<&Hall>) -> Uuid {
        self.add_member(name, Some(Role::Student), hall).await
    }

    /// Provision a principal with a profile.
    pub async fn add_member(&self, name: &str, role: Option<Role>, hall: Option<&Hall>) -> Uuid {
        let principal = self.store.add_principal(name, role).await;
        self.store
            .put_profile(ProfileRecord {
                principal_id: principal.principal_id,
                full_name: Some(name.to_string()),
                local_id: Some(format!("ID-{}", &principal.principal_id.to_string()[..8])),
                phone: Some("08030000000".to_string()),
                hall_id: hall.map(|h| h.hall_id),
                hall_name: None,
            })
            .await;
        principal.principal_id
    }

    /// Submit a valid draft as `student`.
    pub async fn submit(&self, student: Uuid) -> ExitRequest {
        self.state
            .engine
            .submit(student, draft())
            .await
            .expect("Failed to submit exit request")
    }

    /// Submit and approve a request for `student`.
    pub async fn approved(&self, student: Uuid) -> ExitRequest {
        let request = self.submit(student).await;
        self.state
            .engine
            .review(self.hall_admin, request.request_id, Decision::Approve)
            .await
            .expect("Failed to approve exit request")
    }

    /// Submit, approve and check out a request for `student`.
    pub async fn exited(&self, student: Uuid) -> ExitRequest {
        let request = self.approved(student).await;
        self.state
            .verifier
            .mark_exited(self.security, request.request_id)
            .await
            .expect("Failed to mark exit request as exited")
    }

    /// Send a JSON request through the router.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        principal: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(principal) = principal {
            builder = builder.header("X-User-ID", principal.to_string());
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }
}

/// A draft that passes validation.
pub fn draft() -> ExitRequestDraft {
    ExitRequestDraft {
        reason: "Medical appointment".to_string(),
        destination: "University Teaching Hospital".to_string(),
        expected_return_utc: Some(Utc::now() + Duration::hours(6)),
        comment: Some("Back before dinner".to_string()),
    }
}

pub fn draft_json() -> Value {
    serde_json::to_value(draft()).unwrap()
}
