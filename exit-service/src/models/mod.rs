pub mod exit_request;
pub mod identity;
pub mod views;

pub use exit_request::{
    Decision, ExitRequest, ExitRequestDraft, NewExitRequest, RequestDetails, RequestPatch,
    RequestStatus, UnknownStatus,
};
pub use identity::{DirectoryEntry, Hall, Principal, Profile, ProfileRecord, ProfileUpdate, Role};
pub use views::{
    CountByRole, CountByStatus, OversightSummary, PassLookup, PassUsability, RequestFilter,
    RequestView,
};
