//! Propsync - tenant-scoped listing/buyer matching and CRM relationship sync
//!
//! This library computes the compatibility relation between a tenant's
//! listings and buyers, keeps the local relationship cache authoritative, and
//! mirrors it into a remote CRM's association graph through an asynchronous,
//! best-effort reconciliation pipeline.

pub mod config;
pub mod core;
pub mod engine;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::Settings;
pub use core::{compute_diff, is_compatible, Matcher};
pub use engine::{EngineError, MatchSyncEngine};
pub use models::{
    AnchorKind, Buyer, Credential, Listing, ListingStatus, RelationDiff,
    RemoteAssociationRecord, TenantRemoteConfig,
};
