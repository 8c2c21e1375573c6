use crate::models::RemoteAssociationRecord;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors produced at the remote CRM boundary.
///
/// `Transport` is the only transient class; everything else is terminal for
/// the call that produced it. How a terminal error is interpreted (not-found
/// on delete, already-exists on create) is sync-executor policy, not decided
/// here.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Relation already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthorized: token rejected by remote")]
    Unauthorized,

    #[error("API returned error status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Transient failures are worth one retry; terminal ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Transport(e.to_string())
    }
}

/// New token triple returned by the credential-exchange endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Capability interface for the remote relationship records.
///
/// The HTTP implementation is the single place where the remote's loose JSON
/// becomes a typed [`RemoteAssociationRecord`]; everything above this trait
/// works with typed values only.
#[async_trait]
pub trait AssociationApi: Send + Sync {
    /// List every relation record attached to `record_id`. An anchor with no
    /// relations may be signaled by the remote as 404 or 400 rather than an
    /// empty list; those surface as `NotFound` / `BadRequest`.
    async fn list_relations(
        &self,
        access_token: &str,
        association_type: &str,
        record_id: &str,
    ) -> Result<Vec<RemoteAssociationRecord>, RemoteError>;

    async fn create_relation(
        &self,
        access_token: &str,
        association_type: &str,
        left_id: &str,
        right_id: &str,
    ) -> Result<(), RemoteError>;

    /// Delete by the remote-assigned relation id.
    async fn delete_relation(
        &self,
        access_token: &str,
        relation_id: &str,
    ) -> Result<(), RemoteError>;

    /// Delete by the (left, right) pair, for records whose relation id was
    /// never observed.
    async fn delete_relation_by_pair(
        &self,
        access_token: &str,
        association_type: &str,
        left_id: &str,
        right_id: &str,
    ) -> Result<(), RemoteError>;
}

/// Capability interface for exchanging a refresh token for a new grant.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError>;
}

/// Relation record as the remote CRM serializes it.
#[derive(Debug, Deserialize)]
struct RelationDto {
    id: Option<String>,
    #[serde(rename = "firstRecordId")]
    first_record_id: String,
    #[serde(rename = "secondRecordId")]
    second_record_id: String,
}

impl From<RelationDto> for RemoteAssociationRecord {
    fn from(dto: RelationDto) -> Self {
        RemoteAssociationRecord {
            relation_id: dto.id,
            left_id: dto.first_record_id,
            right_id: dto.second_record_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListRelationsDto {
    #[serde(default)]
    relations: Vec<RelationDto>,
}

/// Reqwest-backed client for the remote CRM's association and token APIs.
pub struct RemoteAssociationClient {
    base_url: String,
    api_version: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    client: Client,
}

impl RemoteAssociationClient {
    pub fn new(
        base_url: String,
        api_version: String,
        token_endpoint: String,
        client_id: String,
        client_secret: String,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url,
            api_version,
            token_endpoint,
            client_id,
            client_secret,
            client,
        }
    }

    fn relations_url(&self) -> String {
        format!(
            "{}/associations/relations",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Map a non-success response into the error taxonomy.
    async fn error_for(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(body),
            StatusCode::BAD_REQUEST => RemoteError::BadRequest(body),
            StatusCode::CONFLICT => RemoteError::AlreadyExists(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
            _ => RemoteError::Api {
                status: status.as_u16(),
                body,
            },
        }
    }
}

#[async_trait]
impl AssociationApi for RemoteAssociationClient {
    async fn list_relations(
        &self,
        access_token: &str,
        association_type: &str,
        record_id: &str,
    ) -> Result<Vec<RemoteAssociationRecord>, RemoteError> {
        let url = format!(
            "{}/{}?associationType={}",
            self.relations_url(),
            urlencoding::encode(record_id),
            urlencoding::encode(association_type),
        );

        tracing::debug!(record_id, "listing remote relations");

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let dto: ListRelationsDto = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("relations payload: {e}")))?;

        Ok(dto.relations.into_iter().map(Into::into).collect())
    }

    async fn create_relation(
        &self,
        access_token: &str,
        association_type: &str,
        left_id: &str,
        right_id: &str,
    ) -> Result<(), RemoteError> {
        let payload = serde_json::json!({
            "associationType": association_type,
            "firstRecordId": left_id,
            "secondRecordId": right_id,
        });

        let response = self
            .client
            .post(self.relations_url())
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        tracing::debug!(left_id, right_id, "created remote relation");
        Ok(())
    }

    async fn delete_relation(
        &self,
        access_token: &str,
        relation_id: &str,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}/{}",
            self.relations_url(),
            urlencoding::encode(relation_id)
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        tracing::debug!(relation_id, "deleted remote relation");
        Ok(())
    }

    async fn delete_relation_by_pair(
        &self,
        access_token: &str,
        association_type: &str,
        left_id: &str,
        right_id: &str,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}?associationType={}&firstRecordId={}&secondRecordId={}",
            self.relations_url(),
            urlencoding::encode(association_type),
            urlencoding::encode(left_id),
            urlencoding::encode(right_id),
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        tracing::debug!(left_id, right_id, "deleted remote relation by pair");
        Ok(())
    }
}

#[async_trait]
impl CredentialExchange for RemoteAssociationClient {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(status = status.as_u16(), "refresh token exchange rejected");
            return Err(RemoteError::Unauthorized);
        }

        response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("token payload: {e}")))
    }
}
