//! Gate-side pass checks and the exited/returned transitions.

use crate::models::{
    ExitRequest, PassLookup, PassUsability, RequestPatch, RequestStatus, RequestView, Role,
};
use crate::services::error::LifecycleError;
use crate::services::identity::IdentityResolver;
use crate::services::metrics::{record_error, record_transition};
use crate::services::store::{page_size, RequestStore, StatusQuery};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct PassVerifier {
    store: Arc<dyn RequestStore>,
    identity: IdentityResolver,
}

impl PassVerifier {
    pub fn new(store: Arc<dyn RequestStore>, identity: IdentityResolver) -> Self {
        Self { store, identity }
    }

    /// Resolve a scanned credential to its request and gate verdict.
    #[instrument(skip(self, credential), fields(officer_id = %officer_id))]
    pub async fn lookup_by_credential(
        &self,
        officer_id: Uuid,
        credential: &str,
    ) -> Result<PassLookup, LifecycleError> {
        self.identity
            .require_role(
                officer_id,
                &[Role::Security, Role::SuperAdmin],
                "verify passes",
            )
            .await?;

        let request = self
            .store
            .query_by_credential(credential.trim())
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Pass".to_string()))?;

        let requester = match self
            .identity
            .resolve_profile(request.requester_id, Role::Student)
            .await
        {
            Ok(profile) => Some(profile),
            Err(LifecycleError::ProfileNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let usability = PassUsability::for_status(request.status);
        if !usability.is_usable() {
            warn!(request_id = %request.request_id, status = %request.status, "Pass presented but not usable");
        }

        Ok(PassLookup {
            request,
            requester,
            usability,
        })
    }

    #[instrument(skip(self), fields(officer_id = %officer_id, request_id = %request_id))]
    pub async fn mark_exited(
        &self,
        officer_id: Uuid,
        request_id: Uuid,
    ) -> Result<ExitRequest, LifecycleError> {
        self.gate_transition(
            "mark_exited",
            officer_id,
            request_id,
            RequestStatus::Approved,
            RequestPatch::Exited,
        )
        .await
    }

    #[instrument(skip(self), fields(officer_id = %officer_id, request_id = %request_id))]
    pub async fn mark_returned(
        &self,
        officer_id: Uuid,
        request_id: Uuid,
    ) -> Result<ExitRequest, LifecycleError> {
        self.gate_transition(
            "mark_returned",
            officer_id,
            request_id,
            RequestStatus::Exited,
            RequestPatch::Returned {
                returned_utc: Utc::now(),
            },
        )
        .await
    }

    async fn gate_transition(
        &self,
        transition: &str,
        officer_id: Uuid,
        request_id: Uuid,
        expected: RequestStatus,
        patch: RequestPatch,
    ) -> Result<ExitRequest, LifecycleError> {
        let result = self
            .try_gate_transition(officer_id, request_id, expected, &patch)
            .await;

        match &result {
            Ok(request) => {
                record_transition(transition, "ok");
                info!(
                    request_id = %request_id,
                    officer_id = %officer_id,
                    status = %request.status,
                    "Gate movement recorded"
                );
            }
            Err(e) => {
                record_transition(transition, "rejected");
                record_error(e.error_type());
                warn!(request_id = %request_id, error = %e, "Gate movement rejected");
            }
        }

        result
    }

    async fn try_gate_transition(
        &self,
        officer_id: Uuid,
        request_id: Uuid,
        expected: RequestStatus,
        patch: &RequestPatch,
    ) -> Result<ExitRequest, LifecycleError> {
        self.identity
            .require_role(officer_id, &[Role::Security], "record gate movements")
            .await?;

        self.store
            .conditional_update(request_id, expected, patch)
            .await
            .map_err(|e| LifecycleError::from_conditional(e, request_id, expected))
    }

    /// Latest exits and returns, most recently updated first.
    #[instrument(skip(self))]
    pub async fn recent_gate_activity(
        &self,
        officer_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<RequestView>, LifecycleError> {
        self.identity
            .require_role(
                officer_id,
                &[Role::Security, Role::SuperAdmin],
                "view gate activity",
            )
            .await?;

        let query = StatusQuery::new([RequestStatus::Exited, RequestStatus::Returned])
            .with_limit(page_size(limit, DEFAULT_RECENT_LIMIT));
        let requests = self.store.query_by_status(&query).await?;

        self.identity.annotate(requests).await
    }
}
