// Service exports
pub mod credentials;
pub mod dispatcher;
pub mod remote;
pub mod store;
pub mod sync;

pub use credentials::{CredentialError, CredentialManager};
pub use dispatcher::{DispatchError, Dispatcher, TaskState, TaskStatus};
pub use remote::{
    AssociationApi, CredentialExchange, RemoteAssociationClient, RemoteError, TokenGrant,
};
pub use store::{CredentialStore, EntityStore, RelationCache, TenantConfigStore};
pub use sync::{FixedDelay, PacingPolicy, SyncError, SyncExecutor, SyncOutcome};
