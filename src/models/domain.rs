use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sale status of a listing. Only `Active` listings participate in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
    Unofficial,
}

/// Boolean amenity flags carried by a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmenityFlags {
    #[serde(default)]
    pub balcony: bool,
    #[serde(default)]
    pub garage: bool,
    #[serde(default)]
    pub patio: bool,
    #[serde(default)]
    pub pets_allowed: bool,
}

/// A buyer's stance on a single amenity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmenityPref {
    Required,
    #[default]
    NoPreference,
}

impl AmenityPref {
    /// Whether a listing flag satisfies this preference.
    pub fn accepts(self, flag: bool) -> bool {
        match self {
            AmenityPref::Required => flag,
            AmenityPref::NoPreference => true,
        }
    }
}

/// Per-amenity buyer preferences, one per listing amenity flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmenityPrefs {
    #[serde(default)]
    pub balcony: AmenityPref,
    #[serde(default)]
    pub garage: AmenityPref,
    #[serde(default)]
    pub patio: AmenityPref,
    #[serde(default)]
    pub pets_allowed: AmenityPref,
}

/// An item for sale, scoped to one tenant.
///
/// Snapshots arrive fully validated from the ingestion collaborator;
/// `external_id` is the stable record id assigned by the remote CRM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub tenant_id: String,
    pub external_id: String,
    pub price: Decimal,
    pub rooms: u32,
    pub area: u32,
    pub zone: String,
    #[serde(default)]
    pub amenities: AmenityFlags,
    pub status: ListingStatus,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

/// A party seeking a compatible listing, scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buyer {
    pub tenant_id: String,
    pub external_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub max_budget: Decimal,
    pub min_rooms: u32,
    pub min_area: u32,
    #[serde(default)]
    pub desired_zones: Vec<String>,
    #[serde(default)]
    pub amenity_prefs: AmenityPrefs,
}

/// Which side of the relation a reconciliation task is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Listing,
    Buyer,
}

impl std::fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnchorKind::Listing => write!(f, "listing"),
            AnchorKind::Buyer => write!(f, "buyer"),
        }
    }
}

/// One relationship record as the remote CRM represents it.
///
/// The remote side does not guarantee which role occupies `left_id` vs
/// `right_id`; role is resolved by comparing against the known anchor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAssociationRecord {
    /// Opaque remote-assigned id, unknown until first observed via list.
    pub relation_id: Option<String>,
    pub left_id: String,
    pub right_id: String,
}

impl RemoteAssociationRecord {
    /// Resolve the counterpart id for a given anchor, by comparison rather
    /// than position. Returns `None` when neither side matches the anchor.
    pub fn counterpart_of(&self, anchor_id: &str) -> Option<&str> {
        if self.left_id == anchor_id {
            Some(&self.right_id)
        } else if self.right_id == anchor_id {
            Some(&self.left_id)
        } else {
            None
        }
    }
}

/// Per-tenant expiring access/refresh token pair for the remote CRM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub ttl_seconds: i64,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.ttl_seconds)
    }

    /// True once the token is inside the safety margin before expiry.
    /// A credential in this state must not be presented to the remote API.
    pub fn needs_refresh(&self, safety_margin_secs: i64) -> bool {
        Utc::now() >= self.expires_at() - Duration::seconds(safety_margin_secs)
    }
}

/// Per-tenant remote configuration, resolved at call time and injected into
/// the sync executor rather than compiled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRemoteConfig {
    /// Association schema identifier the remote CRM expects for
    /// listing<->buyer relations in this tenant.
    pub association_type: String,
    /// Deactivated tenants keep local state but generate no remote traffic.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// The add/remove/unchanged partition between the desired and observed
/// relationship sets for one anchor. Sorted for deterministic logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

impl RelationDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of a desired-set computation for one anchor.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// External ids of every compatible counterpart.
    pub desired: BTreeSet<String>,
    /// Candidates examined before filtering.
    pub total_candidates: usize,
}
