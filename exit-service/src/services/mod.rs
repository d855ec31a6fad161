pub mod database;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod oversight;
pub mod store;
pub mod verification;

pub use database::Database;
pub use error::LifecycleError;
pub use identity::{Identity, IdentityResolver};
pub use lifecycle::{LifecycleEngine, ReviewPolicy};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use oversight::OversightView;
pub use store::{IdentityDirectory, RequestStore, StoreError};
pub use verification::PassVerifier;
