//! Exit request lifecycle engine.
//!
//! Every transition is a conditional write against the store, so concurrent
//! callers racing on one request see exactly one winner; the rest observe
//! `InvalidState`. Nothing here retries a failed precondition.

use crate::models::{
    Decision, ExitRequest, ExitRequestDraft, NewExitRequest, RequestDetails, RequestPatch,
    RequestStatus, RequestView, Role,
};
use crate::services::error::LifecycleError;
use crate::services::identity::IdentityResolver;
use crate::services::metrics::{record_error, record_transition};
use crate::services::store::{
    page_size, RequestOrder, RequestStore, StatusQuery, StoreError, DEFAULT_LIST_LIMIT,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_CREDENTIAL_PREFIX: &str = "CEMS";

/// Who may review which requests, and how passes are named.
#[derive(Debug, Clone)]
pub struct ReviewPolicy {
    /// Restrict hall admins to requests from their own hall.
    pub hall_scoped: bool,
    /// Let super admins review alongside hall admins.
    pub allow_super_admin: bool,
    pub credential_prefix: String,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            hall_scoped: false,
            allow_super_admin: true,
            credential_prefix: DEFAULT_CREDENTIAL_PREFIX.to_string(),
        }
    }
}

impl ReviewPolicy {
    fn reviewer_roles(&self) -> &'static [Role] {
        if self.allow_super_admin {
            &[Role::HallAdmin, Role::SuperAdmin]
        } else {
            &[Role::HallAdmin]
        }
    }

    /// Pass credential for `request_id` issued at `issued_utc`.
    pub fn credential_for(&self, request_id: Uuid, issued_utc: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}",
            self.credential_prefix,
            request_id,
            issued_utc.timestamp_millis()
        )
    }
}

/// Report the first draft violation, in field order, then the future check.
pub fn validate_draft(
    draft: &ExitRequestDraft,
    now: DateTime<Utc>,
) -> Result<RequestDetails, LifecycleError> {
    let details = validate_fields(draft)?;
    ensure_future_return(&details, now)?;
    Ok(details)
}

/// Field rules only; the return time must be present but may lie in the past.
pub fn validate_fields(draft: &ExitRequestDraft) -> Result<RequestDetails, LifecycleError> {
    if let Err(errors) = draft.validate() {
        let field_errors = errors.field_errors();
        for field in ExitRequestDraft::FIELD_ORDER {
            if let Some(error) = field_errors.get(field).and_then(|errs| errs.first()) {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                return Err(LifecycleError::validation(field, message));
            }
        }
    }

    let expected_return_utc = draft.expected_return_utc.ok_or_else(|| {
        LifecycleError::validation("expected_return_utc", "Expected return time is required")
    })?;

    Ok(RequestDetails {
        reason: draft.reason.clone(),
        destination: draft.destination.clone(),
        expected_return_utc,
        comment: draft.normalized_comment(),
    })
}

fn ensure_future_return(details: &RequestDetails, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if details.expected_return_utc <= now {
        return Err(LifecycleError::validation(
            "expected_return_utc",
            "Expected return time must be in the future",
        ));
    }
    Ok(())
}

/// Count the outcome of a transition before handing the result back.
fn observe<T>(transition: &str, result: Result<T, LifecycleError>) -> Result<T, LifecycleError> {
    match &result {
        Ok(_) => record_transition(transition, "ok"),
        Err(e) => {
            record_transition(transition, "rejected");
            record_error(e.error_type());
        }
    }
    result
}

#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn RequestStore>,
    identity: IdentityResolver,
    policy: ReviewPolicy,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn RequestStore>, identity: IdentityResolver, policy: ReviewPolicy) -> Self {
        Self {
            store,
            identity,
            policy,
        }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    async fn load(&self, request_id: Uuid) -> Result<ExitRequest, LifecycleError> {
        self.store
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| LifecycleError::request_not_found(request_id))
    }

    /// Load a request the caller owns and that is still pending.
    async fn load_own_pending(
        &self,
        requester_id: Uuid,
        request_id: Uuid,
    ) -> Result<ExitRequest, LifecycleError> {
        let request = self.load(request_id).await?;
        if request.requester_id != requester_id {
            warn!(request_id = %request_id, caller = %requester_id, "Caller does not own request");
            return Err(LifecycleError::Forbidden(
                "only the requester may change this request".to_string(),
            ));
        }
        if request.status != RequestStatus::Pending {
            return Err(LifecycleError::InvalidState {
                expected: RequestStatus::Pending,
                actual: request.status,
            });
        }
        Ok(request)
    }

    #[instrument(skip(self, draft), fields(requester_id = %requester_id))]
    pub async fn submit(
        &self,
        requester_id: Uuid,
        draft: ExitRequestDraft,
    ) -> Result<ExitRequest, LifecycleError> {
        observe("submit", self.try_submit(requester_id, draft).await)
    }

    async fn try_submit(
        &self,
        requester_id: Uuid,
        draft: ExitRequestDraft,
    ) -> Result<ExitRequest, LifecycleError> {
        self.identity
            .require_role(requester_id, &[Role::Student], "submit exit requests")
            .await?;

        let details = validate_draft(&draft, Utc::now())?;

        if self.identity.hall_of(requester_id).await?.is_none() {
            return Err(LifecycleError::HallNotSet);
        }

        let request = self
            .store
            .insert(NewExitRequest {
                requester_id,
                details,
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => LifecycleError::ActiveRequestExists,
                other => LifecycleError::Store(other),
            })?;

        info!(request_id = %request.request_id, requester_id = %requester_id, "Exit request submitted");
        Ok(request)
    }

    #[instrument(skip(self, draft), fields(requester_id = %requester_id, request_id = %request_id))]
    pub async fn edit(
        &self,
        requester_id: Uuid,
        request_id: Uuid,
        draft: ExitRequestDraft,
    ) -> Result<ExitRequest, LifecycleError> {
        observe("edit", self.try_edit(requester_id, request_id, draft).await)
    }

    async fn try_edit(
        &self,
        requester_id: Uuid,
        request_id: Uuid,
        draft: ExitRequestDraft,
    ) -> Result<ExitRequest, LifecycleError> {
        let current = self.load_own_pending(requester_id, request_id).await?;
        let details = validate_fields(&draft)?;
        // An unchanged return time keeps the edit valid after it has passed.
        if details.expected_return_utc != current.expected_return_utc {
            ensure_future_return(&details, Utc::now())?;
        }

        let request = self
            .store
            .conditional_update(
                request_id,
                RequestStatus::Pending,
                &RequestPatch::Details(details),
            )
            .await
            .map_err(|e| LifecycleError::from_conditional(e, request_id, RequestStatus::Pending))?;

        info!(request_id = %request_id, "Exit request edited");
        Ok(request)
    }

    #[instrument(skip(self), fields(requester_id = %requester_id, request_id = %request_id))]
    pub async fn withdraw(&self, requester_id: Uuid, request_id: Uuid) -> Result<(), LifecycleError> {
        observe("withdraw", self.try_withdraw(requester_id, request_id).await)
    }

    async fn try_withdraw(&self, requester_id: Uuid, request_id: Uuid) -> Result<(), LifecycleError> {
        self.load_own_pending(requester_id, request_id).await?;

        self.store
            .delete(request_id, RequestStatus::Pending)
            .await
            .map_err(|e| LifecycleError::from_conditional(e, request_id, RequestStatus::Pending))?;

        info!(request_id = %request_id, "Exit request withdrawn");
        Ok(())
    }

    #[instrument(skip(self), fields(reviewer_id = %reviewer_id, request_id = %request_id))]
    pub async fn review(
        &self,
        reviewer_id: Uuid,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<ExitRequest, LifecycleError> {
        let transition = match decision {
            Decision::Approve => "approve",
            Decision::Decline => "decline",
        };
        observe(
            transition,
            self.try_review(reviewer_id, request_id, decision).await,
        )
    }

    async fn try_review(
        &self,
        reviewer_id: Uuid,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<ExitRequest, LifecycleError> {
        let role = self
            .identity
            .require_role(reviewer_id, self.policy.reviewer_roles(), "review exit requests")
            .await?;

        let request = self.load(request_id).await?;
        self.ensure_in_scope(reviewer_id, role, &request).await?;

        if request.status != RequestStatus::Pending {
            return Err(LifecycleError::InvalidState {
                expected: RequestStatus::Pending,
                actual: request.status,
            });
        }

        let reviewed_utc = Utc::now();
        let pass_credential = match decision {
            Decision::Approve => Some(self.policy.credential_for(request_id, reviewed_utc)),
            Decision::Decline => None,
        };

        let request = self
            .store
            .conditional_update(
                request_id,
                RequestStatus::Pending,
                &RequestPatch::Review {
                    decision,
                    reviewer_id,
                    reviewed_utc,
                    pass_credential,
                },
            )
            .await
            .map_err(|e| LifecycleError::from_conditional(e, request_id, RequestStatus::Pending))?;

        info!(
            request_id = %request_id,
            reviewer_id = %reviewer_id,
            status = %request.status,
            "Exit request reviewed"
        );
        Ok(request)
    }

    /// Enforce hall scoping for hall admins when the policy asks for it.
    async fn ensure_in_scope(
        &self,
        reviewer_id: Uuid,
        role: Role,
        request: &ExitRequest,
    ) -> Result<(), LifecycleError> {
        if !self.policy.hall_scoped || role != Role::HallAdmin {
            return Ok(());
        }

        let reviewer_hall = self.identity.hall_of(reviewer_id).await?;
        let requester_hall = self.identity.hall_of(request.requester_id).await?;
        match (reviewer_hall, requester_hall) {
            (Some(mine), Some(theirs)) if mine.hall_id == theirs.hall_id => Ok(()),
            _ => {
                warn!(
                    request_id = %request.request_id,
                    reviewer_id = %reviewer_id,
                    "Request outside reviewer's hall"
                );
                Err(LifecycleError::Forbidden(
                    "request belongs to another hall".to_string(),
                ))
            }
        }
    }

    /// The caller's own requests, newest first.
    #[instrument(skip(self))]
    pub async fn my_requests(&self, requester_id: Uuid) -> Result<Vec<ExitRequest>, LifecycleError> {
        self.identity
            .require_role(requester_id, &[Role::Student], "list own exit requests")
            .await?;

        Ok(self.store.query_by_requester(requester_id).await?)
    }

    /// A single request, visible to its owner and to staff roles.
    #[instrument(skip(self))]
    pub async fn request_detail(
        &self,
        caller_id: Uuid,
        request_id: Uuid,
    ) -> Result<RequestView, LifecycleError> {
        let role = self
            .identity
            .require_role(caller_id, &Role::ALL, "view exit requests")
            .await?;

        let request = self.load(request_id).await?;
        match role {
            Role::Student if request.requester_id != caller_id => {
                return Err(LifecycleError::Forbidden(
                    "students may only view their own requests".to_string(),
                ));
            }
            Role::HallAdmin => self.ensure_in_scope(caller_id, role, &request).await?,
            _ => {}
        }

        let mut views = self.identity.annotate(vec![request]).await?;
        views
            .pop()
            .ok_or_else(|| LifecycleError::request_not_found(request_id))
    }

    /// Requests for reviewers, newest first, optionally narrowed to one status.
    #[instrument(skip(self))]
    pub async fn review_queue(
        &self,
        reviewer_id: Uuid,
        status: Option<RequestStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<RequestView>, LifecycleError> {
        let role = self
            .identity
            .require_role(reviewer_id, self.policy.reviewer_roles(), "view the review queue")
            .await?;

        let statuses: Vec<RequestStatus> = match status {
            Some(status) => vec![status],
            None => RequestStatus::ALL.to_vec(),
        };
        let mut query = StatusQuery::new(statuses)
            .ordered_by(RequestOrder::Newest)
            .with_limit(page_size(limit, DEFAULT_LIST_LIMIT));

        if self.policy.hall_scoped && role == Role::HallAdmin {
            match self.identity.hall_of(reviewer_id).await? {
                Some(hall) => query = query.in_hall(hall.hall_id),
                None => return Ok(Vec::new()),
            }
        }

        let requests = self.store.query_by_status(&query).await?;
        self.identity.annotate(requests).await
    }
}
