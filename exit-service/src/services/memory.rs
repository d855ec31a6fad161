//! In-memory backend for both store seams.
//!
//! All state sits behind one `RwLock`, so every write (including the
//! one-active-request check on insert) is a single critical section.

use crate::models::{
    DirectoryEntry, ExitRequest, Hall, NewExitRequest, Principal, ProfileRecord, ProfileUpdate,
    RequestPatch, RequestStatus, Role,
};
use crate::services::store::{
    check_transition, IdentityDirectory, RequestOrder, RequestStore, StatusQuery, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    requests: HashMap<Uuid, ExitRequest>,
    principals: HashMap<Uuid, Principal>,
    roles: HashMap<Uuid, Role>,
    profiles: HashMap<Uuid, ProfileRecord>,
    halls: HashMap<Uuid, Hall>,
}

impl MemoryState {
    fn with_hall_name(&self, mut record: ProfileRecord) -> ProfileRecord {
        record.hall_name = record
            .hall_id
            .and_then(|id| self.halls.get(&id))
            .map(|hall| hall.name.clone());
        record
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_hall(&self, name: &str) -> Hall {
        let hall = Hall {
            hall_id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state
            .write()
            .await
            .halls
            .insert(hall.hall_id, hall.clone());
        hall
    }

    /// Register a principal and, when given, its role.
    pub async fn add_principal(&self, display_name: &str, role: Option<Role>) -> Principal {
        let principal = Principal {
            principal_id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            email: format!(
                "{}@campus.test",
                display_name.to_lowercase().replace(' ', ".")
            ),
            created_utc: Utc::now(),
        };

        let mut state = self.state.write().await;
        state
            .principals
            .insert(principal.principal_id, principal.clone());
        if let Some(role) = role {
            state.roles.insert(principal.principal_id, role);
        }
        principal
    }

    pub async fn set_role(&self, principal_id: Uuid, role: Role) {
        self.state.write().await.roles.insert(principal_id, role);
    }

    pub async fn put_profile(&self, record: ProfileRecord) {
        self.state
            .write()
            .await
            .profiles
            .insert(record.principal_id, record);
    }

    /// Overwrite a stored request, bypassing every lifecycle check.
    pub async fn put_request(&self, request: ExitRequest) {
        self.state
            .write()
            .await
            .requests
            .insert(request.request_id, request);
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    #[instrument(skip(self, new), fields(requester_id = %new.requester_id))]
    async fn insert(&self, new: NewExitRequest) -> Result<ExitRequest, StoreError> {
        let mut state = self.state.write().await;

        let has_active = state
            .requests
            .values()
            .any(|r| r.requester_id == new.requester_id && r.status.is_active());
        if has_active {
            return Err(StoreError::UniqueViolation(
                "requester already has an active request".to_string(),
            ));
        }

        let now = Utc::now();
        let request = ExitRequest {
            request_id: Uuid::new_v4(),
            requester_id: new.requester_id,
            reason: new.details.reason,
            destination: new.details.destination,
            expected_return_utc: new.details.expected_return_utc,
            comment: new.details.comment,
            status: RequestStatus::Pending,
            reviewer_id: None,
            reviewed_utc: None,
            pass_credential: None,
            returned_utc: None,
            created_utc: now,
            updated_utc: now,
        };
        state.requests.insert(request.request_id, request.clone());

        info!(request_id = %request.request_id, "Exit request stored");
        Ok(request)
    }

    async fn get_by_id(&self, request_id: Uuid) -> Result<Option<ExitRequest>, StoreError> {
        Ok(self.state.read().await.requests.get(&request_id).cloned())
    }

    #[instrument(skip(self, patch), fields(operation = patch.operation()))]
    async fn conditional_update(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        patch: &RequestPatch,
    ) -> Result<ExitRequest, StoreError> {
        check_transition(expected, patch)?;

        let mut state = self.state.write().await;

        if let RequestPatch::Review {
            pass_credential: Some(credential),
            ..
        } = patch
        {
            let taken = state
                .requests
                .values()
                .any(|r| r.pass_credential.as_deref() == Some(credential.as_str()));
            if taken {
                return Err(StoreError::UniqueViolation(
                    "pass credential already issued".to_string(),
                ));
            }
        }

        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(StoreError::NotFound)?;
        if request.status != expected {
            return Err(StoreError::PreconditionFailed {
                actual: request.status,
            });
        }

        request.apply(patch, Utc::now());
        Ok(request.clone())
    }

    #[instrument(skip(self))]
    async fn delete(&self, request_id: Uuid, expected: RequestStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let actual = state
            .requests
            .get(&request_id)
            .map(|r| r.status)
            .ok_or(StoreError::NotFound)?;
        if actual != expected {
            return Err(StoreError::PreconditionFailed { actual });
        }

        state.requests.remove(&request_id);
        Ok(())
    }

    async fn query_by_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<ExitRequest>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(requests)
    }

    async fn query_by_status(&self, query: &StatusQuery) -> Result<Vec<ExitRequest>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<&ExitRequest> = state
            .requests
            .values()
            .filter(|r| query.matches(r, state.profiles.get(&r.requester_id)))
            .collect();
        match query.order {
            RequestOrder::RecentlyUpdated => {
                requests.sort_by(|a, b| b.updated_utc.cmp(&a.updated_utc))
            }
            RequestOrder::Newest => requests.sort_by(|a, b| b.created_utc.cmp(&a.created_utc)),
            RequestOrder::ReturnDue => {
                requests.sort_by(|a, b| a.expected_return_utc.cmp(&b.expected_return_utc))
            }
        }

        Ok(requests
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn query_by_credential(
        &self,
        credential: &str,
    ) -> Result<Option<ExitRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .values()
            .find(|r| r.pass_credential.as_deref() == Some(credential))
            .cloned())
    }

    async fn status_counts(&self) -> Result<Vec<(RequestStatus, i64)>, StoreError> {
        let state = self.state.read().await;
        let mut counts: HashMap<RequestStatus, i64> = HashMap::new();
        for request in state.requests.values() {
            *counts.entry(request.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStore {
    async fn role_of(&self, principal_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.state.read().await.roles.get(&principal_id).copied())
    }

    async fn profile_record(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .get(&principal_id)
            .cloned()
            .map(|record| state.with_hall_name(record)))
    }

    async fn profile_records(
        &self,
        principal_ids: &[Uuid],
    ) -> Result<Vec<ProfileRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(principal_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .map(|record| state.with_hall_name(record))
            .collect())
    }

    #[instrument(skip(self, update))]
    async fn upsert_profile(
        &self,
        principal_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError> {
        let mut state = self.state.write().await;
        let is_hall_admin = state.roles.get(&principal_id) == Some(&Role::HallAdmin);

        if let Some(existing) = state.profiles.get(&principal_id) {
            let replaces_hall = matches!(
                (existing.hall_id, update.hall_id),
                (Some(current), Some(requested)) if current != requested
            );
            if is_hall_admin && replaces_hall {
                let record = existing.clone();
                return Ok(state.with_hall_name(record));
            }
        }

        let record = state
            .profiles
            .entry(principal_id)
            .or_insert_with(|| ProfileRecord {
                principal_id,
                ..Default::default()
            });
        if let Some(full_name) = &update.full_name {
            record.full_name = Some(full_name.clone());
        }
        if let Some(local_id) = &update.local_id {
            record.local_id = Some(local_id.clone());
        }
        if let Some(phone) = &update.phone {
            record.phone = Some(phone.clone());
        }
        if let Some(hall_id) = update.hall_id {
            record.hall_id = Some(hall_id);
        }

        let record = record.clone();
        Ok(state.with_hall_name(record))
    }

    async fn hall(&self, hall_id: Uuid) -> Result<Option<Hall>, StoreError> {
        Ok(self.state.read().await.halls.get(&hall_id).cloned())
    }

    async fn list_halls(&self) -> Result<Vec<Hall>, StoreError> {
        let mut halls: Vec<_> = self.state.read().await.halls.values().cloned().collect();
        halls.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(halls)
    }

    async fn list_principals(
        &self,
        role: Option<Role>,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .principals
            .values()
            .map(|p| {
                let profile = state
                    .profiles
                    .get(&p.principal_id)
                    .cloned()
                    .map(|record| state.with_hall_name(record));
                DirectoryEntry {
                    principal_id: p.principal_id,
                    display_name: p.display_name.clone(),
                    email: p.email.clone(),
                    role: state.roles.get(&p.principal_id).copied(),
                    full_name: profile.as_ref().and_then(|r| r.full_name.clone()),
                    hall: profile.as_ref().and_then(ProfileRecord::hall),
                }
            })
            .filter(|entry| role.is_none() || entry.role == role)
            .collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(entries)
    }

    async fn role_counts(&self) -> Result<Vec<(Role, i64)>, StoreError> {
        let state = self.state.read().await;
        let mut counts: HashMap<Role, i64> = HashMap::new();
        for role in state.roles.values() {
            *counts.entry(*role).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
