//! PostgreSQL backend for exit-service.

use crate::models::{
    DirectoryEntry, ExitRequest, Hall, NewExitRequest, Principal, ProfileRecord, ProfileUpdate,
    RequestPatch, RequestStatus, Role,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    check_transition, IdentityDirectory, RequestOrder, RequestStore, StatusQuery, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "request_id, requester_id, reason, destination, \
    expected_return_utc, comment, status, reviewer_id, reviewed_utc, pass_credential, \
    returned_utc, created_utc, updated_utc";

const PROFILE_SELECT: &str = "SELECT p.principal_id, p.full_name, p.local_id, p.phone, \
    p.hall_id, h.name AS hall_name \
    FROM profiles p LEFT JOIN halls h ON h.hall_id = p.hall_id";

/// Row shape of `exit_requests`; status is stored as its lowercase token.
#[derive(Debug, FromRow)]
struct ExitRequestRow {
    request_id: Uuid,
    requester_id: Uuid,
    reason: String,
    destination: String,
    expected_return_utc: DateTime<Utc>,
    comment: Option<String>,
    status: String,
    reviewer_id: Option<Uuid>,
    reviewed_utc: Option<DateTime<Utc>>,
    pass_credential: Option<String>,
    returned_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<ExitRequestRow> for ExitRequest {
    type Error = StoreError;

    fn try_from(row: ExitRequestRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RequestStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(ExitRequest {
            request_id: row.request_id,
            requester_id: row.requester_id,
            reason: row.reason,
            destination: row.destination,
            expected_return_utc: row.expected_return_utc,
            comment: row.comment,
            status,
            reviewer_id: row.reviewer_id,
            reviewed_utc: row.reviewed_utc,
            pass_credential: row.pass_credential,
            returned_utc: row.returned_utc,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct DirectoryRow {
    principal_id: Uuid,
    display_name: String,
    email: String,
    role: Option<String>,
    full_name: Option<String>,
    hall_id: Option<Uuid>,
    hall_name: Option<String>,
}

fn parse_role(role: &str) -> Result<Role, StoreError> {
    role.parse::<Role>().map_err(StoreError::Backend)
}

fn rows_to_requests(rows: Vec<ExitRequestRow>) -> Result<Vec<ExitRequest>, StoreError> {
    rows.into_iter().map(ExitRequest::try_from).collect()
}

fn order_by(order: RequestOrder) -> &'static str {
    match order {
        RequestOrder::RecentlyUpdated => "updated_utc DESC",
        RequestOrder::Newest => "created_utc DESC",
        RequestOrder::ReturnDue => "expected_return_utc ASC",
    }
}

/// `ILIKE` pattern matching `text` anywhere, with wildcards escaped.
fn contains_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn backend(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "exit-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Register a principal provisioned by the identity provider.
    #[instrument(skip(self))]
    pub async fn create_principal(
        &self,
        display_name: &str,
        email: &str,
    ) -> Result<Principal, StoreError> {
        sqlx::query_as::<_, Principal>(
            r#"
            INSERT INTO principals (principal_id, display_name, email)
            VALUES ($1, $2, $3)
            RETURNING principal_id, display_name, email, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(display_name)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation(format!("email '{}' already registered", email))
            }
            _ => backend("Failed to create principal", e),
        })
    }

    #[instrument(skip(self))]
    pub async fn assign_role(&self, principal_id: Uuid, role: Role) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (principal_id, role)
            VALUES ($1, $2)
            ON CONFLICT (principal_id) DO UPDATE SET role = EXCLUDED.role, assigned_utc = NOW()
            "#,
        )
        .bind(principal_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to assign role", e))?;

        info!(principal_id = %principal_id, role = %role, "Role assigned");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_hall(&self, name: &str) -> Result<Hall, StoreError> {
        sqlx::query_as::<_, Hall>(
            r#"
            INSERT INTO halls (hall_id, name)
            VALUES ($1, $2)
            RETURNING hall_id, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation(format!("hall '{}' already exists", name))
            }
            _ => backend("Failed to create hall", e),
        })
    }

    async fn current_status(&self, request_id: Uuid) -> Result<Option<RequestStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM exit_requests WHERE request_id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend("Failed to read status", e))?;

        status
            .map(|s| {
                s.parse::<RequestStatus>()
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .transpose()
    }

    /// Explain why a conditional write matched no row.
    async fn precondition_failure(&self, request_id: Uuid) -> StoreError {
        match self.current_status(request_id).await {
            Ok(Some(actual)) => StoreError::PreconditionFailed { actual },
            Ok(None) => StoreError::NotFound,
            Err(e) => e,
        }
    }
}

#[async_trait]
impl RequestStore for Database {
    #[instrument(skip(self, new), fields(requester_id = %new.requester_id))]
    async fn insert(&self, new: NewExitRequest) -> Result<ExitRequest, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_request"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO exit_requests (request_id, requester_id, reason, destination, expected_return_utc, comment, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        );

        let row = sqlx::query_as::<_, ExitRequestRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.requester_id)
            .bind(&new.details.reason)
            .bind(&new.details.destination)
            .bind(new.details.expected_return_utc)
            .bind(&new.details.comment)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    StoreError::UniqueViolation(
                        "requester already has an active request".to_string(),
                    )
                }
                _ => backend("Failed to insert exit request", e),
            })?;

        timer.observe_duration();

        let request = ExitRequest::try_from(row)?;
        info!(request_id = %request.request_id, "Exit request stored");
        Ok(request)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, request_id: Uuid) -> Result<Option<ExitRequest>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_request"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM exit_requests WHERE request_id = $1",
            REQUEST_COLUMNS
        );
        let row = sqlx::query_as::<_, ExitRequestRow>(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get exit request", e))?;

        timer.observe_duration();

        row.map(ExitRequest::try_from).transpose()
    }

    #[instrument(skip(self, patch), fields(operation = patch.operation()))]
    async fn conditional_update(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        patch: &RequestPatch,
    ) -> Result<ExitRequest, StoreError> {
        check_transition(expected, patch)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&[patch.operation()])
            .start_timer();

        let result = match patch {
            RequestPatch::Details(details) => {
                let sql = format!(
                    r#"
                    UPDATE exit_requests
                    SET reason = $3, destination = $4, expected_return_utc = $5, comment = $6,
                        updated_utc = NOW()
                    WHERE request_id = $1 AND status = $2
                    RETURNING {}
                    "#,
                    REQUEST_COLUMNS
                );
                sqlx::query_as::<_, ExitRequestRow>(&sql)
                    .bind(request_id)
                    .bind(expected.as_str())
                    .bind(&details.reason)
                    .bind(&details.destination)
                    .bind(details.expected_return_utc)
                    .bind(&details.comment)
                    .fetch_optional(&self.pool)
                    .await
            }
            RequestPatch::Review {
                decision,
                reviewer_id,
                reviewed_utc,
                pass_credential,
            } => {
                let sql = format!(
                    r#"
                    UPDATE exit_requests
                    SET status = $3, reviewer_id = $4, reviewed_utc = $5, pass_credential = $6,
                        updated_utc = NOW()
                    WHERE request_id = $1 AND status = $2
                    RETURNING {}
                    "#,
                    REQUEST_COLUMNS
                );
                sqlx::query_as::<_, ExitRequestRow>(&sql)
                    .bind(request_id)
                    .bind(expected.as_str())
                    .bind(decision.target_status().as_str())
                    .bind(reviewer_id)
                    .bind(reviewed_utc)
                    .bind(pass_credential)
                    .fetch_optional(&self.pool)
                    .await
            }
            RequestPatch::Exited => {
                let sql = format!(
                    r#"
                    UPDATE exit_requests
                    SET status = 'exited', updated_utc = NOW()
                    WHERE request_id = $1 AND status = $2
                    RETURNING {}
                    "#,
                    REQUEST_COLUMNS
                );
                sqlx::query_as::<_, ExitRequestRow>(&sql)
                    .bind(request_id)
                    .bind(expected.as_str())
                    .fetch_optional(&self.pool)
                    .await
            }
            RequestPatch::Returned { returned_utc } => {
                let sql = format!(
                    r#"
                    UPDATE exit_requests
                    SET status = 'returned', returned_utc = $3, updated_utc = NOW()
                    WHERE request_id = $1 AND status = $2
                    RETURNING {}
                    "#,
                    REQUEST_COLUMNS
                );
                sqlx::query_as::<_, ExitRequestRow>(&sql)
                    .bind(request_id)
                    .bind(expected.as_str())
                    .bind(returned_utc)
                    .fetch_optional(&self.pool)
                    .await
            }
        };

        let row = result.map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation("pass credential already issued".to_string())
            }
            _ => backend("Failed to update exit request", e),
        })?;

        timer.observe_duration();

        match row {
            Some(row) => ExitRequest::try_from(row),
            None => Err(self.precondition_failure(request_id).await),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, request_id: Uuid, expected: RequestStatus) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_request"])
            .start_timer();

        let result = sqlx::query("DELETE FROM exit_requests WHERE request_id = $1 AND status = $2")
            .bind(request_id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Failed to delete exit request", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(self.precondition_failure(request_id).await);
        }

        info!(request_id = %request_id, "Exit request deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_by_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<ExitRequest>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_by_requester"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM exit_requests WHERE requester_id = $1 ORDER BY created_utc DESC",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query_as::<_, ExitRequestRow>(&sql)
            .bind(requester_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list requester's requests", e))?;

        timer.observe_duration();

        rows_to_requests(rows)
    }

    #[instrument(skip(self))]
    async fn query_by_status(&self, query: &StatusQuery) -> Result<Vec<ExitRequest>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_by_status"])
            .start_timer();

        let tokens: Vec<String> = query
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            r#"
            SELECT {} FROM exit_requests
            WHERE status = ANY($1)
              AND ($2::text IS NULL
                   OR destination ILIKE $2
                   OR reason ILIKE $2
                   OR requester_id IN (SELECT principal_id FROM profiles WHERE full_name ILIKE $2))
              AND ($3::uuid IS NULL
                   OR requester_id IN (SELECT principal_id FROM profiles WHERE hall_id = $3))
              AND ($4::timestamptz IS NULL OR expected_return_utc < $4)
            ORDER BY {}
            LIMIT $5
            "#,
            REQUEST_COLUMNS,
            order_by(query.order)
        );
        let rows = sqlx::query_as::<_, ExitRequestRow>(&sql)
            .bind(tokens)
            .bind(query.text.as_deref().map(contains_pattern))
            .bind(query.requester_hall)
            .bind(query.return_due_before)
            .bind(query.limit.map(|limit| limit as i64))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list requests by status", e))?;

        timer.observe_duration();

        rows_to_requests(rows)
    }

    #[instrument(skip(self, credential))]
    async fn query_by_credential(
        &self,
        credential: &str,
    ) -> Result<Option<ExitRequest>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_by_credential"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM exit_requests WHERE pass_credential = $1",
            REQUEST_COLUMNS
        );
        let row = sqlx::query_as::<_, ExitRequestRow>(&sql)
            .bind(credential)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to look up pass credential", e))?;

        timer.observe_duration();

        row.map(ExitRequest::try_from).transpose()
    }

    async fn status_counts(&self) -> Result<Vec<(RequestStatus, i64)>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["status_counts"])
            .start_timer();

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM exit_requests GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| backend("Failed to count requests", e))?;

        timer.observe_duration();

        rows.into_iter()
            .map(|(status, count)| {
                status
                    .parse::<RequestStatus>()
                    .map(|s| (s, count))
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Health check failed", e))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for Database {
    #[instrument(skip(self))]
    async fn role_of(&self, principal_id: Uuid) -> Result<Option<Role>, StoreError> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM user_roles WHERE principal_id = $1")
                .bind(principal_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend("Failed to get role", e))?;

        role.as_deref().map(parse_role).transpose()
    }

    async fn profile_record(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        let sql = format!("{} WHERE p.principal_id = $1", PROFILE_SELECT);
        sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get profile", e))
    }

    async fn profile_records(
        &self,
        principal_ids: &[Uuid],
    ) -> Result<Vec<ProfileRecord>, StoreError> {
        let sql = format!("{} WHERE p.principal_id = ANY($1)", PROFILE_SELECT);
        sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(principal_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list profiles", e))
    }

    #[instrument(skip(self, update))]
    async fn upsert_profile(
        &self,
        principal_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (principal_id, full_name, local_id, phone, hall_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (principal_id) DO UPDATE SET
                full_name = COALESCE(EXCLUDED.full_name, profiles.full_name),
                local_id = COALESCE(EXCLUDED.local_id, profiles.local_id),
                phone = COALESCE(EXCLUDED.phone, profiles.phone),
                hall_id = COALESCE(EXCLUDED.hall_id, profiles.hall_id),
                updated_utc = NOW()
            WHERE EXCLUDED.hall_id IS NULL
               OR profiles.hall_id IS NULL
               OR profiles.hall_id = EXCLUDED.hall_id
               OR NOT EXISTS (
                   SELECT 1 FROM user_roles ur
                   WHERE ur.principal_id = profiles.principal_id AND ur.role = 'hall_admin'
               )
            "#,
        )
        .bind(principal_id)
        .bind(&update.full_name)
        .bind(&update.local_id)
        .bind(&update.phone)
        .bind(update.hall_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to save profile", e))?;

        info!(principal_id = %principal_id, "Profile saved");

        self.profile_record(principal_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn hall(&self, hall_id: Uuid) -> Result<Option<Hall>, StoreError> {
        sqlx::query_as::<_, Hall>("SELECT hall_id, name FROM halls WHERE hall_id = $1")
            .bind(hall_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get hall", e))
    }

    async fn list_halls(&self) -> Result<Vec<Hall>, StoreError> {
        sqlx::query_as::<_, Hall>("SELECT hall_id, name FROM halls ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list halls", e))
    }

    async fn list_principals(
        &self,
        role: Option<Role>,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, DirectoryRow>(
            r#"
            SELECT pr.principal_id, pr.display_name, pr.email, ur.role,
                   p.full_name, p.hall_id, h.name AS hall_name
            FROM principals pr
            LEFT JOIN user_roles ur ON ur.principal_id = pr.principal_id
            LEFT JOIN profiles p ON p.principal_id = pr.principal_id
            LEFT JOIN halls h ON h.hall_id = p.hall_id
            WHERE ($1::varchar IS NULL OR ur.role = $1)
            ORDER BY pr.display_name
            "#,
        )
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("Failed to list principals", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(DirectoryEntry {
                    principal_id: row.principal_id,
                    display_name: row.display_name,
                    email: row.email,
                    role: row.role.as_deref().map(parse_role).transpose()?,
                    full_name: row.full_name,
                    hall: row.hall_id.map(|hall_id| Hall {
                        hall_id,
                        name: row.hall_name.unwrap_or_default(),
                    }),
                })
            })
            .collect()
    }

    async fn role_counts(&self) -> Result<Vec<(Role, i64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT role, COUNT(*) FROM user_roles GROUP BY role")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| backend("Failed to count roles", e))?;

        rows.into_iter()
            .map(|(role, count)| parse_role(&role).map(|r| (r, count)))
            .collect()
    }
}
