use crate::core::compute_diff;
use crate::models::{AnchorKind, RelationDiff, RemoteAssociationRecord, TenantRemoteConfig};
use crate::services::credentials::{CredentialError, CredentialManager};
use crate::services::remote::{AssociationApi, RemoteError};
use crate::services::store::TenantConfigStore;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("tenant {0} has no remote configuration")]
    TenantNotConfigured(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("listing remote relations failed: {0}")]
    ListFailed(#[source] RemoteError),
}

/// Pluggable pause between consecutive remote mutation calls, to respect the
/// remote system's throughput limits.
#[async_trait]
pub trait PacingPolicy: Send + Sync {
    async fn pause(&self);
}

/// Default pacing: a fixed delay between calls. Zero disables pacing.
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PacingPolicy for FixedDelay {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Counts reported by one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub retries: u32,
    /// True when the cycle was skipped without touching the remote
    /// (inactive tenant).
    pub skipped: bool,
}

/// Applies relationship diffs to the remote CRM: best-effort, at-least-once,
/// no rollback. Deletions run before creations so a remote cardinality limit
/// between the same pair never sees a transient duplicate.
pub struct SyncExecutor {
    api: Arc<dyn AssociationApi>,
    credentials: Arc<CredentialManager>,
    tenant_configs: Arc<TenantConfigStore>,
    pacing: Arc<dyn PacingPolicy>,
}

impl SyncExecutor {
    pub fn new(
        api: Arc<dyn AssociationApi>,
        credentials: Arc<CredentialManager>,
        tenant_configs: Arc<TenantConfigStore>,
        pacing: Arc<dyn PacingPolicy>,
    ) -> Self {
        Self {
            api,
            credentials,
            tenant_configs,
            pacing,
        }
    }

    /// One full reconciliation cycle for an anchor: resolve tenant config,
    /// obtain a valid token, fetch the observed set, diff, apply.
    ///
    /// Credential failure aborts the cycle for this tenant; the remote graph
    /// is left as-is until the next trigger retries.
    pub async fn reconcile(
        &self,
        tenant_id: &str,
        anchor_kind: AnchorKind,
        anchor_id: &str,
        desired: &BTreeSet<String>,
    ) -> Result<SyncOutcome, SyncError> {
        let config = self
            .tenant_configs
            .get(tenant_id)
            .await
            .ok_or_else(|| SyncError::TenantNotConfigured(tenant_id.to_string()))?;

        if !config.active {
            tracing::info!(tenant_id, anchor_id, "tenant inactive, skipping remote sync");
            return Ok(SyncOutcome {
                skipped: true,
                ..SyncOutcome::default()
            });
        }

        let token = self.credentials.get_valid(tenant_id).await?;

        let (observed, list_retries) = self
            .fetch_observed(&token, &config.association_type, anchor_id)
            .await?;

        let diff = compute_diff(desired, &observed);
        tracing::debug!(
            tenant_id,
            anchor = %anchor_kind,
            anchor_id,
            to_add = diff.to_add.len(),
            to_remove = diff.to_remove.len(),
            unchanged = diff.unchanged.len(),
            "computed relation diff"
        );

        let mut outcome = self
            .apply(tenant_id, anchor_kind, anchor_id, &token, &config, &diff, &observed)
            .await;
        outcome.retries += list_retries;

        tracing::info!(
            tenant_id,
            anchor = %anchor_kind,
            anchor_id,
            added = outcome.added,
            removed = outcome.removed,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            retries = outcome.retries,
            "reconciliation cycle finished"
        );
        Ok(outcome)
    }

    /// Fetch the remote-observed set for an anchor, keyed by counterpart id.
    ///
    /// A remote "not found" or "bad request" means no existing records: the
    /// observed set is empty and every desired relationship gets recreated.
    pub async fn fetch_observed(
        &self,
        access_token: &str,
        association_type: &str,
        anchor_id: &str,
    ) -> Result<(HashMap<String, RemoteAssociationRecord>, u32), SyncError> {
        let (result, retries) = with_retry(|| {
            self.api
                .list_relations(access_token, association_type, anchor_id)
        })
        .await;

        let records = match result {
            Ok(records) => records,
            Err(RemoteError::NotFound(_)) | Err(RemoteError::BadRequest(_)) => {
                tracing::debug!(anchor_id, "remote reports no relations, observed set is empty");
                return Ok((HashMap::new(), retries));
            }
            Err(e) => return Err(SyncError::ListFailed(e)),
        };

        let mut observed = HashMap::with_capacity(records.len());
        for record in records {
            match record.counterpart_of(anchor_id) {
                Some(counterpart) => {
                    observed.insert(counterpart.to_string(), record);
                }
                None => {
                    tracing::warn!(
                        anchor_id,
                        left_id = %record.left_id,
                        right_id = %record.right_id,
                        "relation record does not reference the anchor, skipping"
                    );
                }
            }
        }
        Ok((observed, retries))
    }

    /// Apply a diff: deletions, then creations, paced between calls.
    /// Individual failures are logged and dropped without aborting the batch.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        tenant_id: &str,
        anchor_kind: AnchorKind,
        anchor_id: &str,
        access_token: &str,
        config: &TenantRemoteConfig,
        diff: &RelationDiff,
        observed: &HashMap<String, RemoteAssociationRecord>,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            unchanged: diff.unchanged.len(),
            ..SyncOutcome::default()
        };
        let mut first_call = true;

        for counterpart_id in &diff.to_remove {
            let Some(record) = observed.get(counterpart_id) else {
                continue;
            };

            if !std::mem::take(&mut first_call) {
                self.pacing.pause().await;
            }

            let (result, retries) = match &record.relation_id {
                Some(relation_id) => {
                    with_retry(|| self.api.delete_relation(access_token, relation_id)).await
                }
                None => {
                    with_retry(|| {
                        self.api.delete_relation_by_pair(
                            access_token,
                            &config.association_type,
                            &record.left_id,
                            &record.right_id,
                        )
                    })
                    .await
                }
            };
            outcome.retries += retries;

            match result {
                Ok(()) => outcome.removed += 1,
                // Already absent is the desired end state.
                Err(RemoteError::NotFound(_)) => {
                    tracing::debug!(tenant_id, anchor_id, counterpart_id, "relation already absent");
                    outcome.removed += 1;
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(
                        tenant_id,
                        anchor_id,
                        counterpart_id,
                        operation = "delete",
                        error = %e,
                        "remote mutation failed, dropping item"
                    );
                }
            }
        }

        for counterpart_id in &diff.to_add {
            if !std::mem::take(&mut first_call) {
                self.pacing.pause().await;
            }

            // Role convention pinned by contract tests: listing occupies the
            // first (left) position, buyer the second.
            let (left_id, right_id) = match anchor_kind {
                AnchorKind::Listing => (anchor_id, counterpart_id.as_str()),
                AnchorKind::Buyer => (counterpart_id.as_str(), anchor_id),
            };

            let (result, retries) = with_retry(|| {
                self.api
                    .create_relation(access_token, &config.association_type, left_id, right_id)
            })
            .await;
            outcome.retries += retries;

            match result {
                Ok(()) => outcome.added += 1,
                Err(RemoteError::AlreadyExists(_)) => {
                    tracing::debug!(tenant_id, anchor_id, counterpart_id, "relation already present");
                    outcome.added += 1;
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(
                        tenant_id,
                        anchor_id,
                        counterpart_id,
                        operation = "create",
                        error = %e,
                        "remote mutation failed, dropping item"
                    );
                }
            }
        }

        outcome
    }
}

/// Run a remote call, retrying exactly once on a transient transport error.
async fn with_retry<T, F, Fut>(op: F) -> (Result<T, RemoteError>, u32)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(error = %e, "transient remote failure, retrying once");
            (op().await, 1)
        }
        result => (result, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credential;
    use crate::services::remote::{CredentialExchange, TokenGrant};
    use crate::services::store::CredentialStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory remote relationship graph with scriptable failures.
    #[derive(Default)]
    struct FakeRemote {
        relations: Mutex<Vec<RemoteAssociationRecord>>,
        next_id: AtomicUsize,
        create_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        // Consumed once each: the first matching call fails.
        transient_create_failures: AtomicUsize,
        not_found_on_delete: bool,
        not_found_on_list: bool,
        terminal_create_failures: AtomicUsize,
    }

    impl FakeRemote {
        fn seed(&self, left: &str, right: &str) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.relations.lock().unwrap().push(RemoteAssociationRecord {
                relation_id: Some(format!("rel_{id}")),
                left_id: left.to_string(),
                right_id: right.to_string(),
            });
        }

        fn pairs(&self) -> Vec<(String, String)> {
            self.relations
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.left_id.clone(), r.right_id.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl AssociationApi for FakeRemote {
        async fn list_relations(
            &self,
            _access_token: &str,
            _association_type: &str,
            record_id: &str,
        ) -> Result<Vec<RemoteAssociationRecord>, RemoteError> {
            if self.not_found_on_list {
                return Err(RemoteError::NotFound("no relations".to_string()));
            }
            Ok(self
                .relations
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.left_id == record_id || r.right_id == record_id)
                .cloned()
                .collect())
        }

        async fn create_relation(
            &self,
            _access_token: &str,
            _association_type: &str,
            left_id: &str,
            right_id: &str,
        ) -> Result<(), RemoteError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .transient_create_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RemoteError::Transport("connection reset".to_string()));
            }
            if self
                .terminal_create_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RemoteError::Api {
                    status: 500,
                    body: "remote exploded".to_string(),
                });
            }
            let mut relations = self.relations.lock().unwrap();
            if relations
                .iter()
                .any(|r| r.left_id == left_id && r.right_id == right_id)
            {
                return Err(RemoteError::AlreadyExists("duplicate".to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            relations.push(RemoteAssociationRecord {
                relation_id: Some(format!("rel_{id}")),
                left_id: left_id.to_string(),
                right_id: right_id.to_string(),
            });
            Ok(())
        }

        async fn delete_relation(
            &self,
            _access_token: &str,
            relation_id: &str,
        ) -> Result<(), RemoteError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.not_found_on_delete {
                return Err(RemoteError::NotFound("gone".to_string()));
            }
            let mut relations = self.relations.lock().unwrap();
            let before = relations.len();
            relations.retain(|r| r.relation_id.as_deref() != Some(relation_id));
            if relations.len() == before {
                return Err(RemoteError::NotFound(relation_id.to_string()));
            }
            Ok(())
        }

        async fn delete_relation_by_pair(
            &self,
            _access_token: &str,
            _association_type: &str,
            left_id: &str,
            right_id: &str,
        ) -> Result<(), RemoteError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let mut relations = self.relations.lock().unwrap();
            let before = relations.len();
            relations.retain(|r| !(r.left_id == left_id && r.right_id == right_id));
            if relations.len() == before {
                return Err(RemoteError::NotFound(format!("{left_id}/{right_id}")));
            }
            Ok(())
        }
    }

    struct FakeExchange;

    #[async_trait]
    impl CredentialExchange for FakeExchange {
        async fn exchange_refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<TokenGrant, RemoteError> {
            Ok(TokenGrant {
                access_token: "refreshed_at".to_string(),
                refresh_token: "next_rt".to_string(),
                expires_in: 86400,
            })
        }
    }

    async fn executor_with(remote: Arc<FakeRemote>) -> SyncExecutor {
        let store = Arc::new(CredentialStore::new());
        store
            .put(
                "t1",
                Credential {
                    access_token: "at".to_string(),
                    refresh_token: "rt".to_string(),
                    ttl_seconds: 86400,
                    issued_at: Utc::now(),
                },
            )
            .await;
        let credentials = Arc::new(CredentialManager::new(store, Arc::new(FakeExchange), 300));

        let configs = Arc::new(TenantConfigStore::new());
        configs
            .put(
                "t1",
                TenantRemoteConfig {
                    association_type: "buyer_interest".to_string(),
                    active: true,
                },
            )
            .await;

        SyncExecutor::new(
            remote,
            credentials,
            configs,
            Arc::new(FixedDelay::new(Duration::ZERO)),
        )
    }

    fn desired(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_converges_to_desired_set() {
        let remote = Arc::new(FakeRemote::default());
        remote.seed("l1", "b_old");
        remote.seed("l1", "b_keep");
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b_keep", "b_new"]))
            .await
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.failed, 0);

        let mut pairs = remote.pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("l1".to_string(), "b_keep".to_string()),
                ("l1".to_string(), "b_new".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let remote = Arc::new(FakeRemote::default());
        remote.seed("l1", "b_old");
        let executor = executor_with(remote.clone()).await;
        let want = desired(&["b1", "b2"]);

        executor
            .reconcile("t1", AnchorKind::Listing, "l1", &want)
            .await
            .unwrap();

        // Second pass against the now-updated remote finds nothing to do.
        let second = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &want)
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[tokio::test]
    async fn test_not_found_on_delete_counts_as_removed() {
        let remote = Arc::new(FakeRemote {
            not_found_on_delete: true,
            ..FakeRemote::default()
        });
        remote.seed("l1", "b_old");
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&[]))
            .await
            .unwrap();

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_not_found_on_list_recreates_entire_desired_set() {
        let remote = Arc::new(FakeRemote {
            not_found_on_list: true,
            ..FakeRemote::default()
        });
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b1", "b2"]))
            .await
            .unwrap();

        assert_eq!(outcome.added, 2);
        assert_eq!(remote.pairs().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_create_failure_retried_once() {
        let remote = Arc::new(FakeRemote {
            transient_create_failures: AtomicUsize::new(1),
            ..FakeRemote::default()
        });
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b1"]))
            .await
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.retries, 1);
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_failure_drops_item_without_aborting_batch() {
        // The first create fails terminally (no retry); the remaining items
        // still get applied.
        let remote = Arc::new(FakeRemote {
            terminal_create_failures: AtomicUsize::new(1),
            ..FakeRemote::default()
        });
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b1", "b2", "b3"]))
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.added, 2);
        assert_eq!(remote.pairs().len(), 2);
    }

    #[tokio::test]
    async fn test_buyer_anchor_keeps_listing_in_left_position() {
        let remote = Arc::new(FakeRemote::default());
        let executor = executor_with(remote.clone()).await;

        executor
            .reconcile("t1", AnchorKind::Buyer, "b1", &desired(&["l1"]))
            .await
            .unwrap();

        assert_eq!(remote.pairs(), vec![("l1".to_string(), "b1".to_string())]);
    }

    #[tokio::test]
    async fn test_deletions_applied_before_creations() {
        let remote = Arc::new(FakeRemote::default());
        remote.seed("l1", "b_old");
        let executor = executor_with(remote.clone()).await;

        executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b_new"]))
            .await
            .unwrap();

        // The deleted record's id is lower than the created one's: the
        // creation allocated its id after the delete ran.
        let relations = remote.relations.lock().unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_id.as_deref(), Some("rel_1"));
    }

    #[tokio::test]
    async fn test_inactive_tenant_skips_remote_sync() {
        let remote = Arc::new(FakeRemote::default());
        let executor = executor_with(remote.clone()).await;
        executor
            .tenant_configs
            .put(
                "t1",
                TenantRemoteConfig {
                    association_type: "buyer_interest".to_string(),
                    active: false,
                },
            )
            .await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&["b1"]))
            .await
            .unwrap();

        assert!(outcome.skipped);
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_tenant_is_an_error() {
        let remote = Arc::new(FakeRemote::default());
        let executor = executor_with(remote).await;

        let err = executor
            .reconcile("t_unknown", AnchorKind::Listing, "l1", &desired(&["b1"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TenantNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unknown_relation_id_deleted_by_pair() {
        let remote = Arc::new(FakeRemote::default());
        // A record whose relation id was never observed.
        remote.relations.lock().unwrap().push(RemoteAssociationRecord {
            relation_id: None,
            left_id: "l1".to_string(),
            right_id: "b_old".to_string(),
        });
        let executor = executor_with(remote.clone()).await;

        let outcome = executor
            .reconcile("t1", AnchorKind::Listing, "l1", &desired(&[]))
            .await
            .unwrap();

        assert_eq!(outcome.removed, 1);
        assert!(remote.pairs().is_empty());
    }
}
