use crate::models::Credential;
use crate::services::remote::{CredentialExchange, RemoteError};
use crate::services::store::CredentialStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for tenant {0}")]
    Missing(String),

    #[error("refresh token exchange failed: {0}")]
    RefreshFailed(#[source] RemoteError),
}

/// Owns per-tenant credential state and lazy refresh.
///
/// A token inside the safety margin before expiry is never handed out;
/// `get_valid` refreshes it first. Refresh is serialized per tenant so
/// concurrent callers coalesce onto a single remote exchange instead of
/// racing last-writer-wins on the store.
pub struct CredentialManager {
    store: Arc<CredentialStore>,
    exchange: Arc<dyn CredentialExchange>,
    safety_margin_secs: i64,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<CredentialStore>,
        exchange: Arc<dyn CredentialExchange>,
        safety_margin_secs: i64,
    ) -> Self {
        Self {
            store,
            exchange,
            safety_margin_secs,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return an access token safe to present to the remote API, refreshing
    /// first when the stored one is expired or inside the safety margin.
    pub async fn get_valid(&self, tenant_id: &str) -> Result<String, CredentialError> {
        let credential = self
            .store
            .get(tenant_id)
            .await
            .ok_or_else(|| CredentialError::Missing(tenant_id.to_string()))?;

        if !credential.needs_refresh(self.safety_margin_secs) {
            return Ok(credential.access_token);
        }

        tracing::info!(tenant_id, "access token inside safety margin, refreshing");
        self.refresh(tenant_id).await
    }

    /// Exchange the stored refresh token for a new triple and persist it.
    /// On failure the stored state is left untouched.
    pub async fn refresh(&self, tenant_id: &str) -> Result<String, CredentialError> {
        let lock = self.refresh_lock_for(tenant_id);
        let _guard = lock.lock().await;

        // Another caller may have completed the refresh while we waited.
        let credential = self
            .store
            .get(tenant_id)
            .await
            .ok_or_else(|| CredentialError::Missing(tenant_id.to_string()))?;
        if !credential.needs_refresh(self.safety_margin_secs) {
            return Ok(credential.access_token);
        }

        let grant = self
            .exchange
            .exchange_refresh_token(&credential.refresh_token)
            .await
            .map_err(|e| {
                tracing::warn!(tenant_id, error = %e, "credential refresh failed");
                CredentialError::RefreshFailed(e)
            })?;

        let refreshed = Credential {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token,
            ttl_seconds: grant.expires_in,
            issued_at: Utc::now(),
        };
        self.store.put(tenant_id, refreshed).await;

        tracing::info!(tenant_id, "credential refreshed");
        Ok(grant.access_token)
    }

    fn refresh_lock_for(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
