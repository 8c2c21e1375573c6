use crate::models::{AnchorKind, Buyer, Credential, Listing, TenantRemoteConfig};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// In-memory entity snapshots, keyed by `(tenant_id, external_id)`.
///
/// This is the crate's persistence boundary: the ingestion collaborator
/// supplies validated snapshots and durable storage is an integration
/// concern layered on top.
#[derive(Default)]
pub struct EntityStore {
    listings: RwLock<HashMap<(String, String), Listing>>,
    buyers: RwLock<HashMap<(String, String), Buyer>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_listing(&self, listing: Listing) {
        let key = (listing.tenant_id.clone(), listing.external_id.clone());
        self.listings.write().await.insert(key, listing);
    }

    pub async fn upsert_buyer(&self, buyer: Buyer) {
        let key = (buyer.tenant_id.clone(), buyer.external_id.clone());
        self.buyers.write().await.insert(key, buyer);
    }

    pub async fn listings_for_tenant(&self, tenant_id: &str) -> Vec<Listing> {
        self.listings
            .read()
            .await
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn buyers_for_tenant(&self, tenant_id: &str) -> Vec<Buyer> {
        self.buyers
            .read()
            .await
            .values()
            .filter(|b| b.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

/// Authoritative local relationship set: `(listing_id, buyer_id)` pairs per
/// tenant. Mutation is synchronous and strongly consistent; the remote graph
/// is only a best-effort mirror of this cache.
#[derive(Default)]
pub struct RelationCache {
    pairs: RwLock<HashMap<String, BTreeSet<(String, String)>>>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every pair anchored on `anchor_id` with the freshly computed
    /// counterpart set, leaving other anchors' pairs untouched.
    pub async fn replace_for_anchor(
        &self,
        tenant_id: &str,
        kind: AnchorKind,
        anchor_id: &str,
        counterparts: &BTreeSet<String>,
    ) {
        let mut guard = self.pairs.write().await;
        let pairs = guard.entry(tenant_id.to_string()).or_default();

        pairs.retain(|(listing_id, buyer_id)| match kind {
            AnchorKind::Listing => listing_id != anchor_id,
            AnchorKind::Buyer => buyer_id != anchor_id,
        });

        for counterpart in counterparts {
            let pair = match kind {
                AnchorKind::Listing => (anchor_id.to_string(), counterpart.clone()),
                AnchorKind::Buyer => (counterpart.clone(), anchor_id.to_string()),
            };
            pairs.insert(pair);
        }
    }

    /// Counterpart ids currently related to an anchor.
    pub async fn counterparts_for(
        &self,
        tenant_id: &str,
        kind: AnchorKind,
        anchor_id: &str,
    ) -> BTreeSet<String> {
        let guard = self.pairs.read().await;
        let Some(pairs) = guard.get(tenant_id) else {
            return BTreeSet::new();
        };
        pairs
            .iter()
            .filter_map(|(listing_id, buyer_id)| match kind {
                AnchorKind::Listing if listing_id == anchor_id => Some(buyer_id.clone()),
                AnchorKind::Buyer if buyer_id == anchor_id => Some(listing_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Full snapshot of a tenant's relationship pairs.
    pub async fn snapshot(&self, tenant_id: &str) -> BTreeSet<(String, String)> {
        self.pairs
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Per-tenant remote configuration, resolved at reconcile time.
#[derive(Default)]
pub struct TenantConfigStore {
    configs: RwLock<HashMap<String, TenantRemoteConfig>>,
}

impl TenantConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, tenant_id: &str, config: TenantRemoteConfig) {
        self.configs
            .write()
            .await
            .insert(tenant_id.to_string(), config);
    }

    pub async fn get(&self, tenant_id: &str) -> Option<TenantRemoteConfig> {
        self.configs.read().await.get(tenant_id).cloned()
    }
}

/// One credential record per tenant.
#[derive(Default)]
pub struct CredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, tenant_id: &str, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(tenant_id.to_string(), credential);
    }

    pub async fn get(&self, tenant_id: &str) -> Option<Credential> {
        self.credentials.read().await.get(tenant_id).cloned()
    }
}
