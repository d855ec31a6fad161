//! Exit request model and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of an exit request.
///
/// The lowercase tokens are part of the external contract: reporting and the
/// pass usability check key off these literal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Exited,
    Returned,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Declined,
        RequestStatus::Exited,
        RequestStatus::Returned,
    ];

    /// Statuses that block a requester from submitting another request.
    pub const ACTIVE: [RequestStatus; 3] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Exited,
    ];

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Exited => "exited",
            Self::Returned => "returned",
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Declined)
                | (Self::Approved, Self::Exited)
                | (Self::Exited, Self::Returned)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            "exited" => Ok(Self::Exited),
            "returned" => Ok(Self::Returned),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exit request status '{0}'")]
pub struct UnknownStatus(pub String);

/// Reviewer decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Decline,
}

impl Decision {
    /// Status the request moves to when this decision is recorded.
    pub fn target_status(self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Decline => RequestStatus::Declined,
        }
    }
}

/// Exit request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub reason: String,
    pub destination: String,
    pub expected_return_utc: DateTime<Utc>,
    pub comment: Option<String>,
    pub status: RequestStatus,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub pass_credential: Option<String>,
    pub returned_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ExitRequest {
    /// Reviewer and review time, present only once the request was reviewed.
    pub fn review(&self) -> Option<(Uuid, DateTime<Utc>)> {
        self.reviewer_id.zip(self.reviewed_utc)
    }

    /// Apply a patch in memory, mirroring what the SQL backends do.
    pub fn apply(&mut self, patch: &RequestPatch, now: DateTime<Utc>) {
        match patch {
            RequestPatch::Details(details) => {
                self.reason = details.reason.clone();
                self.destination = details.destination.clone();
                self.expected_return_utc = details.expected_return_utc;
                self.comment = details.comment.clone();
            }
            RequestPatch::Review {
                reviewer_id,
                reviewed_utc,
                pass_credential,
                ..
            } => {
                self.reviewer_id = Some(*reviewer_id);
                self.reviewed_utc = Some(*reviewed_utc);
                self.pass_credential = pass_credential.clone();
            }
            RequestPatch::Exited => {}
            RequestPatch::Returned { returned_utc } => {
                self.returned_utc = Some(*returned_utc);
            }
        }
        if let Some(status) = patch.target_status() {
            self.status = status;
        }
        self.updated_utc = now;
    }
}

/// Requester-supplied fields of a request, as submitted or edited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ExitRequestDraft {
    #[validate(length(min = 5, max = 200, message = "Reason must be 5 to 200 characters"))]
    pub reason: String,

    #[validate(length(min = 3, max = 100, message = "Destination must be 3 to 100 characters"))]
    pub destination: String,

    #[validate(required(message = "Expected return time is required"))]
    pub expected_return_utc: Option<DateTime<Utc>>,

    #[validate(length(max = 500, message = "Comment must be at most 500 characters"))]
    pub comment: Option<String>,
}

impl ExitRequestDraft {
    /// Field order used when reporting the first violation.
    pub const FIELD_ORDER: [&'static str; 4] =
        ["reason", "destination", "expected_return_utc", "comment"];

    /// Blank comments are stored as absent.
    pub fn normalized_comment(&self) -> Option<String> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

/// Validated request details written by submit and edit.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDetails {
    pub reason: String,
    pub destination: String,
    pub expected_return_utc: DateTime<Utc>,
    pub comment: Option<String>,
}

/// Input for inserting a new pending request.
#[derive(Debug, Clone)]
pub struct NewExitRequest {
    pub requester_id: Uuid,
    pub details: RequestDetails,
}

/// Mutation applied by a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPatch {
    /// Requester edit of a pending request.
    Details(RequestDetails),
    /// Reviewer decision; `pass_credential` is set only for approvals.
    Review {
        decision: Decision,
        reviewer_id: Uuid,
        reviewed_utc: DateTime<Utc>,
        pass_credential: Option<String>,
    },
    Exited,
    Returned { returned_utc: DateTime<Utc> },
}

impl RequestPatch {
    /// Status the patch moves a request into; `None` for in-place edits.
    pub fn target_status(&self) -> Option<RequestStatus> {
        match self {
            RequestPatch::Details(_) => None,
            RequestPatch::Review { decision, .. } => Some(decision.target_status()),
            RequestPatch::Exited => Some(RequestStatus::Exited),
            RequestPatch::Returned { .. } => Some(RequestStatus::Returned),
        }
    }

    /// Label used for logs and metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            RequestPatch::Details(_) => "edit",
            RequestPatch::Review {
                decision: Decision::Approve,
                ..
            } => "approve",
            RequestPatch::Review {
                decision: Decision::Decline,
                ..
            } => "decline",
            RequestPatch::Exited => "mark_exited",
            RequestPatch::Returned { .. } => "mark_returned",
        }
    }
}
