// Model exports
pub mod domain;

pub use domain::{
    AmenityFlags, AmenityPref, AmenityPrefs, AnchorKind, Buyer, Credential, Listing,
    ListingStatus, MatchOutcome, RelationDiff, RemoteAssociationRecord, TenantRemoteConfig,
};
