//! Storage seams used by the engine services.

use crate::models::{
    DirectoryEntry, ExitRequest, Hall, NewExitRequest, ProfileRecord, ProfileUpdate, RequestPatch,
    RequestStatus, Role,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;

/// Requested page size, defaulted and clamped to `1..=MAX_LIST_LIMIT`.
pub fn page_size(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Precondition failed: current status is {actual}")]
    PreconditionFailed { actual: RequestStatus },

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Reject a patch whose status change is not an edge of the lifecycle graph.
///
/// Both backends call this before touching a row.
pub fn check_transition(expected: RequestStatus, patch: &RequestPatch) -> Result<(), StoreError> {
    match patch.target_status() {
        Some(to) if !expected.can_transition_to(to) => Err(StoreError::IllegalTransition {
            from: expected,
            to,
        }),
        _ => Ok(()),
    }
}

/// Sort order of a status listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestOrder {
    /// Most recently updated first.
    #[default]
    RecentlyUpdated,
    /// Most recently created first.
    Newest,
    /// Earliest expected return first.
    ReturnDue,
}

/// Filtered, ordered and bounded listing of requests.
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub statuses: Vec<RequestStatus>,
    /// Lowercased needle matched against requester name, destination and reason.
    pub text: Option<String>,
    /// Only requests whose requester belongs to this hall.
    pub requester_hall: Option<Uuid>,
    /// Only requests expected back strictly before this instant.
    pub return_due_before: Option<DateTime<Utc>>,
    pub order: RequestOrder,
    pub limit: Option<usize>,
}

impl StatusQuery {
    pub fn new(statuses: impl Into<Vec<RequestStatus>>) -> Self {
        Self {
            statuses: statuses.into(),
            ..Default::default()
        }
    }

    /// Free-text filter; blank input is ignored.
    pub fn with_text(mut self, text: Option<&str>) -> Self {
        self.text = text
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        self
    }

    pub fn in_hall(mut self, hall_id: Uuid) -> Self {
        self.requester_hall = Some(hall_id);
        self
    }

    pub fn due_before(mut self, as_of: DateTime<Utc>) -> Self {
        self.return_due_before = Some(as_of);
        self
    }

    pub fn ordered_by(mut self, order: RequestOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `request` passes every filter. Order and limit are not checked.
    pub fn matches(&self, request: &ExitRequest, requester: Option<&ProfileRecord>) -> bool {
        if !self.statuses.contains(&request.status) {
            return false;
        }
        if let Some(hall_id) = self.requester_hall {
            if requester.and_then(|r| r.hall_id) != Some(hall_id) {
                return false;
            }
        }
        if let Some(before) = self.return_due_before {
            if request.expected_return_utc >= before {
                return false;
            }
        }
        match &self.text {
            Some(needle) => requester
                .and_then(|r| r.full_name.as_deref())
                .into_iter()
                .chain([request.destination.as_str(), request.reason.as_str()])
                .any(|haystack| haystack.to_lowercase().contains(needle.as_str())),
            None => true,
        }
    }
}

/// Transactional record of exit requests.
///
/// Every status change goes through `conditional_update`, which applies the
/// patch only while the stored status still equals `expected`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new `pending` request. Fails with `UniqueViolation` when the
    /// requester already holds an active request.
    async fn insert(&self, new: NewExitRequest) -> Result<ExitRequest, StoreError>;

    async fn get_by_id(&self, request_id: Uuid) -> Result<Option<ExitRequest>, StoreError>;

    async fn conditional_update(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        patch: &RequestPatch,
    ) -> Result<ExitRequest, StoreError>;

    /// Delete the request only while its status equals `expected`.
    async fn delete(&self, request_id: Uuid, expected: RequestStatus) -> Result<(), StoreError>;

    /// Requests of one requester, newest first.
    async fn query_by_requester(&self, requester_id: Uuid)
        -> Result<Vec<ExitRequest>, StoreError>;

    /// Requests matching `query`, in its order, at most `query.limit` rows.
    async fn query_by_status(&self, query: &StatusQuery) -> Result<Vec<ExitRequest>, StoreError>;

    async fn query_by_credential(&self, credential: &str)
        -> Result<Option<ExitRequest>, StoreError>;

    /// Request counts for statuses that have at least one request.
    async fn status_counts(&self) -> Result<Vec<(RequestStatus, i64)>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Principals, roles, profiles and halls.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn role_of(&self, principal_id: Uuid) -> Result<Option<Role>, StoreError>;

    async fn profile_record(&self, principal_id: Uuid)
        -> Result<Option<ProfileRecord>, StoreError>;

    async fn profile_records(
        &self,
        principal_ids: &[Uuid],
    ) -> Result<Vec<ProfileRecord>, StoreError>;

    /// Create or patch a profile; `None` fields keep their stored value.
    ///
    /// A hall admin's hall, once set, is never replaced: an update naming a
    /// different hall leaves the whole record untouched.
    async fn upsert_profile(
        &self,
        principal_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError>;

    async fn hall(&self, hall_id: Uuid) -> Result<Option<Hall>, StoreError>;

    /// All halls ordered by name.
    async fn list_halls(&self) -> Result<Vec<Hall>, StoreError>;

    async fn list_principals(&self, role: Option<Role>)
        -> Result<Vec<DirectoryEntry>, StoreError>;

    /// Principal counts for roles that have at least one holder.
    async fn role_counts(&self) -> Result<Vec<(Role, i64)>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: RequestStatus) -> ExitRequest {
        let now = Utc::now();
        ExitRequest {
            request_id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            reason: "Hospital appointment".to_string(),
            destination: "Lagos Island".to_string(),
            expected_return_utc: now,
            comment: None,
            status,
            reviewer_id: None,
            reviewed_utc: None,
            pass_credential: None,
            returned_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    fn record(name: &str, hall_id: Option<Uuid>) -> ProfileRecord {
        ProfileRecord {
            full_name: Some(name.to_string()),
            hall_id,
            ..Default::default()
        }
    }

    #[test]
    fn text_match_ignores_case_across_fields() {
        let r = request(RequestStatus::Pending);
        let who = record("Chidi Okafor", None);
        let query = |text: &str| StatusQuery::new(RequestStatus::ALL).with_text(Some(text));

        assert!(query("OKAFOR").matches(&r, Some(&who)));
        assert!(query("lagos").matches(&r, Some(&who)));
        assert!(query("appoint").matches(&r, None));
        assert!(!query("abuja").matches(&r, Some(&who)));
        assert!(query("   ").matches(&r, None));
    }

    #[test]
    fn hall_and_due_filters_narrow_matches() {
        let r = request(RequestStatus::Exited);
        let hall = Uuid::new_v4();

        let in_hall = StatusQuery::new([RequestStatus::Exited]).in_hall(hall);
        assert!(in_hall.matches(&r, Some(&record("A", Some(hall)))));
        assert!(!in_hall.matches(&r, Some(&record("A", Some(Uuid::new_v4())))));
        assert!(!in_hall.matches(&r, None));

        let due = StatusQuery::new([RequestStatus::Exited]);
        assert!(due
            .clone()
            .due_before(r.expected_return_utc + chrono::Duration::seconds(1))
            .matches(&r, None));
        assert!(!due.due_before(r.expected_return_utc).matches(&r, None));

        assert!(!StatusQuery::new([RequestStatus::Pending]).matches(&r, None));
    }

    #[test]
    fn only_lifecycle_edges_pass_the_transition_check() {
        assert!(check_transition(RequestStatus::Approved, &RequestPatch::Exited).is_ok());
        assert!(matches!(
            check_transition(RequestStatus::Pending, &RequestPatch::Exited),
            Err(StoreError::IllegalTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Exited
            })
        ));
        assert!(matches!(
            check_transition(
                RequestStatus::Approved,
                &RequestPatch::Returned {
                    returned_utc: Utc::now()
                }
            ),
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn page_size_is_defaulted_and_clamped() {
        assert_eq!(page_size(None, 10), 10);
        assert_eq!(page_size(Some(0), 10), 1);
        assert_eq!(page_size(Some(10_000), 10), MAX_LIST_LIMIT);
    }
}
