use crate::config::Settings;
use crate::core::Matcher;
use crate::models::{AnchorKind, Buyer, Credential, Listing, TenantRemoteConfig};
use crate::services::credentials::CredentialManager;
use crate::services::dispatcher::{DispatchError, Dispatcher, TaskStatus};
use crate::services::remote::RemoteAssociationClient;
use crate::services::store::{CredentialStore, EntityStore, RelationCache, TenantConfigStore};
use crate::services::sync::{FixedDelay, SyncExecutor};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tenant {0} is not registered")]
    UnknownTenant(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Facade consumed by the ingestion collaborator.
///
/// Each trigger recomputes the anchor's desired relationship set, commits it
/// to the local relation cache synchronously, then schedules a background
/// reconciliation of the remote graph. The trigger caller never observes the
/// remote outcome; it is reported through the task registry and logs.
pub struct MatchSyncEngine {
    entities: Arc<EntityStore>,
    relations: Arc<RelationCache>,
    tenant_configs: Arc<TenantConfigStore>,
    credentials: Arc<CredentialStore>,
    matcher: Matcher,
    dispatcher: Dispatcher,
}

impl MatchSyncEngine {
    pub fn new(
        entities: Arc<EntityStore>,
        relations: Arc<RelationCache>,
        tenant_configs: Arc<TenantConfigStore>,
        credentials: Arc<CredentialStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            entities,
            relations,
            tenant_configs,
            credentials,
            matcher: Matcher::new(),
            dispatcher,
        }
    }

    /// Wire the full engine from configuration: HTTP client, stores,
    /// credential manager, sync executor, and worker pool.
    ///
    /// Must be called from within a tokio runtime; the dispatcher spawns its
    /// workers immediately.
    pub fn from_settings(settings: &Settings) -> Self {
        let client = Arc::new(RemoteAssociationClient::new(
            settings.remote.endpoint.clone(),
            settings.remote.api_version.clone(),
            settings.oauth.token_endpoint.clone(),
            settings.oauth.client_id.clone(),
            settings.oauth.client_secret.clone(),
            settings.remote.timeout_secs,
        ));

        let entities = Arc::new(EntityStore::new());
        let relations = Arc::new(RelationCache::new());
        let tenant_configs = Arc::new(TenantConfigStore::new());
        let credentials = Arc::new(CredentialStore::new());

        let manager = Arc::new(CredentialManager::new(
            credentials.clone(),
            client.clone(),
            settings.credentials.safety_margin_secs,
        ));
        let executor = Arc::new(SyncExecutor::new(
            client,
            manager,
            tenant_configs.clone(),
            Arc::new(FixedDelay::new(Duration::from_millis(
                settings.sync.inter_call_delay_ms,
            ))),
        ));
        let dispatcher = Dispatcher::start(
            executor,
            relations.clone(),
            settings.sync.queue_capacity,
            settings.sync.workers,
        );

        Self::new(entities, relations, tenant_configs, credentials, dispatcher)
    }

    /// Register (or update) a tenant: its remote configuration and the
    /// credential obtained by the install handshake.
    pub async fn register_tenant(
        &self,
        tenant_id: &str,
        config: TenantRemoteConfig,
        credential: Credential,
    ) {
        self.tenant_configs.put(tenant_id, config).await;
        self.credentials.put(tenant_id, credential).await;
        tracing::info!(tenant_id, "tenant registered");
    }

    /// A listing was created or updated: recompute its desired buyer set and
    /// schedule reconciliation. Returns the background task id.
    pub async fn on_listing_changed(&self, listing: Listing) -> Result<Uuid, EngineError> {
        let tenant_id = listing.tenant_id.clone();
        let anchor_id = listing.external_id.clone();
        self.ensure_tenant(&tenant_id).await?;

        self.entities.upsert_listing(listing.clone()).await;

        let buyers = self.entities.buyers_for_tenant(&tenant_id).await;
        let outcome = self.matcher.desired_buyers_for_listing(&listing, &buyers);

        tracing::info!(
            tenant_id = %tenant_id,
            listing_id = %anchor_id,
            candidates = outcome.total_candidates,
            matched = outcome.desired.len(),
            "listing changed, recomputed matches"
        );

        self.commit_and_submit(&tenant_id, AnchorKind::Listing, &anchor_id, outcome.desired)
            .await
    }

    /// A buyer was created or updated: mirror image of `on_listing_changed`.
    pub async fn on_buyer_changed(&self, buyer: Buyer) -> Result<Uuid, EngineError> {
        let tenant_id = buyer.tenant_id.clone();
        let anchor_id = buyer.external_id.clone();
        self.ensure_tenant(&tenant_id).await?;

        self.entities.upsert_buyer(buyer.clone()).await;

        let listings = self.entities.listings_for_tenant(&tenant_id).await;
        let outcome = self.matcher.desired_listings_for_buyer(&buyer, &listings);

        tracing::info!(
            tenant_id = %tenant_id,
            buyer_id = %anchor_id,
            candidates = outcome.total_candidates,
            matched = outcome.desired.len(),
            "buyer changed, recomputed matches"
        );

        self.commit_and_submit(&tenant_id, AnchorKind::Buyer, &anchor_id, outcome.desired)
            .await
    }

    /// Local relationship snapshot for a tenant, for the read-only API layer.
    pub async fn relations_for(&self, tenant_id: &str) -> BTreeSet<(String, String)> {
        self.relations.snapshot(tenant_id).await
    }

    /// Counterparts currently related to an anchor in the local cache.
    pub async fn related_to(
        &self,
        tenant_id: &str,
        kind: AnchorKind,
        anchor_id: &str,
    ) -> BTreeSet<String> {
        self.relations.counterparts_for(tenant_id, kind, anchor_id).await
    }

    /// Status of a previously submitted reconciliation task.
    pub fn task_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.dispatcher.status(task_id)
    }

    async fn ensure_tenant(&self, tenant_id: &str) -> Result<(), EngineError> {
        if self.tenant_configs.get(tenant_id).await.is_none() {
            return Err(EngineError::UnknownTenant(tenant_id.to_string()));
        }
        Ok(())
    }

    /// Commit the desired set locally (synchronous, authoritative), then
    /// enqueue the asynchronous remote reconciliation. The task re-reads the
    /// cache when it runs, so the commit must land first.
    async fn commit_and_submit(
        &self,
        tenant_id: &str,
        kind: AnchorKind,
        anchor_id: &str,
        desired: BTreeSet<String>,
    ) -> Result<Uuid, EngineError> {
        self.relations
            .replace_for_anchor(tenant_id, kind, anchor_id, &desired)
            .await;

        let task_id = self.dispatcher.submit(tenant_id, kind, anchor_id)?;
        Ok(task_id)
    }
}
