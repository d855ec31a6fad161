//! Role and profile resolution for authenticated principals.

use crate::models::{
    ExitRequest, Hall, Profile, ProfileRecord, ProfileUpdate, RequestView, Role,
};
use crate::services::error::LifecycleError;
use crate::services::store::IdentityDirectory;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Identity summary for the caller of `/me`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Identity {
    pub principal_id: Uuid,
    pub role: Option<Role>,
    pub profile: Option<Profile>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn IdentityDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn IdentityDirectory> {
        &self.directory
    }

    /// Role of `principal_id`, or `None` when unassigned.
    ///
    /// Fails closed: a directory error is logged and read as unassigned.
    #[instrument(skip(self))]
    pub async fn resolve_role(&self, principal_id: Uuid) -> Option<Role> {
        match self.directory.role_of(principal_id).await {
            Ok(role) => role,
            Err(e) => {
                warn!(principal_id = %principal_id, error = %e, "Role lookup failed, treating as unassigned");
                None
            }
        }
    }

    /// Resolve the caller's role and require it to be one of `allowed`.
    pub async fn require_role(
        &self,
        principal_id: Uuid,
        allowed: &[Role],
        action: &str,
    ) -> Result<Role, LifecycleError> {
        match self.resolve_role(principal_id).await {
            Some(role) if allowed.contains(&role) => Ok(role),
            Some(role) => {
                warn!(principal_id = %principal_id, role = %role, action, "Role not permitted");
                Err(LifecycleError::Forbidden(format!(
                    "role {} may not {}",
                    role, action
                )))
            }
            None => {
                warn!(principal_id = %principal_id, action, "Unassigned principal denied");
                Err(LifecycleError::Forbidden(format!(
                    "no role assigned; cannot {}",
                    action
                )))
            }
        }
    }

    pub async fn resolve_profile(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Profile, LifecycleError> {
        let record = self
            .directory
            .profile_record(principal_id)
            .await?
            .ok_or(LifecycleError::ProfileNotFound(principal_id))?;

        Ok(Profile::from_record(role, record))
    }

    /// Hall affiliation of a principal, if any.
    pub async fn hall_of(&self, principal_id: Uuid) -> Result<Option<Hall>, LifecycleError> {
        Ok(self
            .directory
            .profile_record(principal_id)
            .await?
            .and_then(|record| record.hall()))
    }

    pub async fn identity(&self, principal_id: Uuid) -> Result<Identity, LifecycleError> {
        let role = self.resolve_role(principal_id).await;
        let profile = match role {
            Some(role) => match self.resolve_profile(principal_id, role).await {
                Ok(profile) => Some(profile),
                Err(LifecycleError::ProfileNotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(Identity {
            principal_id,
            role,
            profile,
        })
    }

    /// Update the caller's own profile.
    ///
    /// Students may change their hall freely. A hall admin may set one only
    /// while none is assigned. Other roles carry no hall.
    #[instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        principal_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Profile, LifecycleError> {
        let role = self
            .require_role(principal_id, &Role::ALL, "update a profile")
            .await?;

        if let Err(errors) = update.validate() {
            let field_errors = errors.field_errors();
            for field in ProfileUpdate::FIELD_ORDER {
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

        let current = self.directory.profile_record(principal_id).await?;

        if let Some(hall_id) = update.hall_id {
            let current_hall = current.as_ref().and_then(|r| r.hall_id);
            match role {
                Role::Student => {}
                Role::HallAdmin => {
                    if current_hall.is_some_and(|existing| existing != hall_id) {
                        return Err(LifecycleError::Forbidden(
                            "hall admin affiliation cannot be changed once set".to_string(),
                        ));
                    }
                }
                Role::Security | Role::SuperAdmin => {
                    return Err(LifecycleError::Forbidden(format!(
                        "role {} has no hall affiliation",
                        role
                    )));
                }
            }

            if self.directory.hall(hall_id).await?.is_none() {
                return Err(LifecycleError::validation("hall_id", "Unknown hall"));
            }
        }

        let record = self.directory.upsert_profile(principal_id, &update).await?;
        // A concurrent update may have set a different hall first.
        if role == Role::HallAdmin && update.hall_id.is_some() && record.hall_id != update.hall_id {
            warn!(principal_id = %principal_id, "Hall admin affiliation already set concurrently");
            return Err(LifecycleError::Forbidden(
                "hall admin affiliation cannot be changed once set".to_string(),
            ));
        }
        info!(principal_id = %principal_id, role = %role, "Profile updated");

        Ok(Profile::from_record(role, record))
    }

    pub async fn list_halls(&self) -> Result<Vec<Hall>, LifecycleError> {
        Ok(self.directory.list_halls().await?)
    }

    /// Attach requester name and hall to each request, preserving order.
    pub async fn annotate(
        &self,
        requests: Vec<ExitRequest>,
    ) -> Result<Vec<RequestView>, LifecycleError> {
        let mut ids: Vec<Uuid> = requests.iter().map(|r| r.requester_id).collect();
        ids.sort();
        ids.dedup();

        let records: HashMap<Uuid, ProfileRecord> = self
            .directory
            .profile_records(&ids)
            .await?
            .into_iter()
            .map(|record| (record.principal_id, record))
            .collect();

        Ok(requests
            .into_iter()
            .map(|request| {
                let record = records.get(&request.requester_id);
                RequestView {
                    requester_name: record.and_then(|r| r.full_name.clone()),
                    requester_hall: record.and_then(ProfileRecord::hall),
                    request,
                }
            })
            .collect())
    }
}
