use crate::models::{Decision, RequestFilter, RequestStatus, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub decision: Decision,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    pub status: Option<RequestStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestListParams {
    pub status: Option<RequestStatus>,
    pub q: Option<String>,
    pub limit: Option<usize>,
}

impl From<RequestListParams> for RequestFilter {
    fn from(params: RequestListParams) -> Self {
        RequestFilter {
            status: params.status,
            q: params.q.filter(|q| !q.trim().is_empty()),
            limit: params.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListParams {
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverdueParams {
    pub as_of: Option<DateTime<Utc>>,
}
