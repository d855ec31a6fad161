//! Read models returned by listings, gate lookups and oversight.

use super::{ExitRequest, Hall, Profile, RequestStatus, Role};
use serde::{Deserialize, Serialize};

/// An exit request annotated with its requester's display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: ExitRequest,
    pub requester_name: Option<String>,
    pub requester_hall: Option<Hall>,
}

/// Gate eligibility of a pass at the moment it was looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PassUsability {
    ReadyForExit,
    ReadyForReturn,
    NotUsable { status: RequestStatus },
}

impl PassUsability {
    pub fn for_status(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Approved => PassUsability::ReadyForExit,
            RequestStatus::Exited => PassUsability::ReadyForReturn,
            other => PassUsability::NotUsable { status: other },
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, PassUsability::NotUsable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassLookup {
    pub request: ExitRequest,
    pub requester: Option<Profile>,
    pub usability: PassUsability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountByStatus {
    pub status: RequestStatus,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountByRole {
    pub role: Role,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversightSummary {
    pub total_requests: i64,
    pub requests_by_status: Vec<CountByStatus>,
    pub users_by_role: Vec<CountByRole>,
}

impl OversightSummary {
    pub fn count_for(&self, status: RequestStatus) -> i64 {
        self.requests_by_status
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// Oversight listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usability_follows_status() {
        assert_eq!(
            PassUsability::for_status(RequestStatus::Approved),
            PassUsability::ReadyForExit
        );
        assert_eq!(
            PassUsability::for_status(RequestStatus::Exited),
            PassUsability::ReadyForReturn
        );
        let returned = PassUsability::for_status(RequestStatus::Returned);
        assert!(!returned.is_usable());
        assert_eq!(
            serde_json::to_value(returned).unwrap(),
            serde_json::json!({ "verdict": "not_usable", "status": "returned" })
        );
    }
}
