//! Read-only reporting across all requests and principals.

use crate::models::{
    CountByRole, CountByStatus, DirectoryEntry, OversightSummary, RequestFilter, RequestStatus,
    RequestView, Role,
};
use crate::services::error::LifecycleError;
use crate::services::identity::IdentityResolver;
use crate::services::store::{
    page_size, RequestOrder, RequestStore, StatusQuery, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct OversightView {
    store: Arc<dyn RequestStore>,
    identity: IdentityResolver,
}

impl OversightView {
    pub fn new(store: Arc<dyn RequestStore>, identity: IdentityResolver) -> Self {
        Self { store, identity }
    }

    async fn require_super_admin(&self, caller_id: Uuid, action: &str) -> Result<(), LifecycleError> {
        self.identity
            .require_role(caller_id, &[Role::SuperAdmin], action)
            .await
            .map(|_| ())
    }

    /// Zero-filled request counts by status and principal counts by role.
    #[instrument(skip(self))]
    pub async fn summary(&self, caller_id: Uuid) -> Result<OversightSummary, LifecycleError> {
        self.require_super_admin(caller_id, "view oversight summary")
            .await?;

        let by_status: HashMap<RequestStatus, i64> =
            self.store.status_counts().await?.into_iter().collect();
        let by_role: HashMap<Role, i64> = self
            .identity
            .directory()
            .role_counts()
            .await?
            .into_iter()
            .collect();

        let requests_by_status: Vec<CountByStatus> = RequestStatus::ALL
            .into_iter()
            .map(|status| CountByStatus {
                status,
                count: by_status.get(&status).copied().unwrap_or(0),
            })
            .collect();

        Ok(OversightSummary {
            total_requests: requests_by_status.iter().map(|c| c.count).sum(),
            requests_by_status,
            users_by_role: Role::ALL
                .into_iter()
                .map(|role| CountByRole {
                    role,
                    count: by_role.get(&role).copied().unwrap_or(0),
                })
                .collect(),
        })
    }

    /// Requests newest first, filtered by status and free text.
    #[instrument(skip(self))]
    pub async fn list_requests(
        &self,
        caller_id: Uuid,
        filter: RequestFilter,
    ) -> Result<Vec<RequestView>, LifecycleError> {
        self.require_super_admin(caller_id, "list all exit requests")
            .await?;

        let statuses: Vec<RequestStatus> = match filter.status {
            Some(status) => vec![status],
            None => RequestStatus::ALL.to_vec(),
        };
        let query = StatusQuery::new(statuses)
            .with_text(filter.q.as_deref())
            .ordered_by(RequestOrder::Newest)
            .with_limit(page_size(filter.limit, DEFAULT_LIST_LIMIT));
        let requests = self.store.query_by_status(&query).await?;

        self.identity.annotate(requests).await
    }

    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        caller_id: Uuid,
        role: Option<Role>,
    ) -> Result<Vec<DirectoryEntry>, LifecycleError> {
        self.require_super_admin(caller_id, "list users").await?;

        Ok(self.identity.directory().list_principals(role).await?)
    }

    /// Exited requests whose expected return lies before `as_of`, most
    /// overdue first.
    #[instrument(skip(self))]
    pub async fn overdue(
        &self,
        caller_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<RequestView>, LifecycleError> {
        self.identity
            .require_role(
                caller_id,
                &[Role::SuperAdmin, Role::Security],
                "view overdue requests",
            )
            .await?;

        let query = StatusQuery::new([RequestStatus::Exited])
            .due_before(as_of.unwrap_or_else(Utc::now))
            .ordered_by(RequestOrder::ReturnDue)
            .with_limit(MAX_LIST_LIMIT);
        let requests = self.store.query_by_status(&query).await?;

        self.identity.annotate(requests).await
    }
}
