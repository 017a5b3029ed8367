use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::models::{
    ApiError, Catalog, DeleteOutcome, ImageDescriptor, LegacyManifest, TagList, TokenResponse,
    V1Compatibility,
};
use crate::policy::LATEST;
use crate::settings::{Credentials, Endpoints};
use crate::token::TokenCache;

const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";
const CATALOG_SCOPE: &str = "registry:catalog";
const MANIFEST_UNKNOWN: &str = "manifest unknown";

/// The registry operations the cleanup engine needs.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_catalog(&self) -> Result<Vec<String>, AppError>;

    /// Tags of a repository in listing order; an absent `tags` key yields an empty list
    async fn list_tags(&self, repo: &str) -> Result<Vec<String>, AppError>;

    async fn get_image(&self, repo: &str, tag: &str) -> Result<Option<ImageDescriptor>, AppError>;

    async fn delete_image(&self, repo: &str, tag: &str) -> Result<DeleteOutcome, AppError>;
}

pub fn repository_scope(repo: &str) -> String {
    format!("repository:{}", repo)
}

pub struct RegistryClient {
    client: Client,
    endpoints: Endpoints,
    credentials: Credentials,
    tokens: Mutex<TokenCache>,
    dry_run: bool,
}

impl RegistryClient {
    pub fn new(
        endpoints: Endpoints,
        credentials: Credentials,
        dry_run: bool,
        insecure_tls: bool,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            credentials,
            tokens: Mutex::new(TokenCache::default()),
            dry_run,
        })
    }

    /// Return a bearer token for `scope`, asking the token authority only on a miss or expiry
    pub async fn get_bearer(&self, scope: &str) -> Result<String, AppError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(scope, Instant::now()) {
            return Ok(token.to_string());
        }

        let url = format!("{}/", self.endpoints.jwt);
        debug!("GET {} (scope {})", url, scope);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("service", "container_registry".to_string()),
                ("scope", format!("{}:*", scope)),
            ])
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(|e| AppError::Auth {
                scope: scope.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Auth {
                scope: scope.to_string(),
                message: format!("token authority returned status {}", status),
            });
        }

        let body: TokenResponse = resp.json().await.map_err(|e| AppError::Auth {
            scope: scope.to_string(),
            message: format!("malformed token response: {}", e),
        })?;
        let token = body.token.ok_or_else(|| AppError::Auth {
            scope: scope.to_string(),
            message: "response has no \"token\" field".to_string(),
        })?;

        tokens.insert(scope, token.clone(), Instant::now());
        debug!("Cached token for {} ({} scopes cached)", scope, tokens.len());
        Ok(token)
    }

    async fn authorization(&self, scope: &str) -> Result<String, AppError> {
        Ok(format!("Bearer {}", self.get_bearer(scope).await?))
    }

    /// GET a registry path; 404 bodies are parsed like 200 bodies
    async fn get_json(&self, path: &str, scope: &str) -> Result<Value, AppError> {
        let url = format!("{}{}", self.endpoints.registry, path);
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.authorization(scope).await?)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
            return Err(AppError::UnexpectedStatus {
                method: "GET",
                url,
                status,
            });
        }

        let body: Value = resp.json().await?;
        if let Some(message) = first_error_message(&body) {
            if message != MANIFEST_UNKNOWN {
                error!("{}: {}", url, message);
            }
        }
        Ok(body)
    }

    /// GET /v2/_catalog
    pub async fn get_catalog(&self) -> Result<Vec<String>, AppError> {
        let body = self.get_json("/v2/_catalog", CATALOG_SCOPE).await?;
        let catalog: Catalog = serde_json::from_value(body)?;
        Ok(catalog.repositories)
    }

    /// GET /v2/<repo>/tags/list
    pub async fn get_tags(&self, repo: &str) -> Result<TagList, AppError> {
        let body = self
            .get_json(&format!("/v2/{}/tags/list", repo), &repository_scope(repo))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// GET /v2/<repo>/manifests/<tag>
    pub async fn get_manifest(&self, repo: &str, tag: &str) -> Result<Value, AppError> {
        self.get_json(
            &format!("/v2/{}/manifests/{}", repo, tag),
            &repository_scope(repo),
        )
        .await
    }

    /// Resolve a tag to its image via the legacy compatibility blob
    pub async fn fetch_image(
        &self,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ImageDescriptor>, AppError> {
        let manifest = self.get_manifest(repo, tag).await?;
        let image = parse_image(repo, tag, manifest)?;
        if image.is_none() && tag != LATEST {
            warn!("No image found for {}:{}", repo, tag);
        }
        Ok(image)
    }

    /// HEAD /v2/<repo>/manifests/<tag> — Docker-Content-Digest, or None once the tag is gone
    pub async fn get_digest(&self, repo: &str, tag: &str) -> Result<Option<String>, AppError> {
        let url = format!("{}/v2/{}/manifests/{}", self.endpoints.registry, repo, tag);
        debug!("HEAD {}", url);
        let resp = self
            .client
            .head(&url)
            .header(AUTHORIZATION, self.authorization(&repository_scope(repo)).await?)
            .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AppError::UnexpectedStatus {
                method: "HEAD",
                url,
                status,
            });
        }

        digest_header(&resp)
            .map(Some)
            .ok_or_else(|| AppError::MissingDigest {
                repo: repo.to_string(),
                tag: tag.to_string(),
            })
    }

    /// DELETE /v2/<repo>/manifests/<digest>.
    ///
    /// Only 202 is `Deleted`; any other status is `Rejected` and logged. In
    /// dry-run mode no request is sent and the outcome is `DryRun`.
    pub async fn delete_manifest(
        &self,
        repo: &str,
        digest: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let url = format!("{}/v2/{}/manifests/{}", self.endpoints.registry, repo, digest);
        if self.dry_run {
            info!("~ Dry run, skipped DELETE {}", url);
            return Ok(DeleteOutcome::DryRun);
        }

        debug!("DELETE {}", url);
        let resp = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, self.authorization(&repository_scope(repo)).await?)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            info!("+ OK {}@{}", repo, digest);
            Ok(DeleteOutcome::Deleted)
        } else {
            let body = resp.text().await.unwrap_or_default();
            error!("DELETE {} returned status {}: {}", url, status, body.trim());
            Ok(DeleteOutcome::Rejected(status))
        }
    }

    /// Resolve the tag's current digest and delete the manifest behind it
    pub async fn remove_tag(&self, repo: &str, tag: &str) -> Result<DeleteOutcome, AppError> {
        // Digests must come from the tag at delete time
        let Some(digest) = self.get_digest(repo, tag).await? else {
            debug!("HEAD {}:{} returned 404", repo, tag);
            return Ok(DeleteOutcome::NotFound);
        };
        self.delete_manifest(repo, &digest).await
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn list_catalog(&self) -> Result<Vec<String>, AppError> {
        self.get_catalog().await
    }

    async fn list_tags(&self, repo: &str) -> Result<Vec<String>, AppError> {
        Ok(self.get_tags(repo).await?.tags.unwrap_or_default())
    }

    async fn get_image(&self, repo: &str, tag: &str) -> Result<Option<ImageDescriptor>, AppError> {
        self.fetch_image(repo, tag).await
    }

    async fn delete_image(&self, repo: &str, tag: &str) -> Result<DeleteOutcome, AppError> {
        self.remove_tag(repo, tag).await
    }
}

fn first_error_message(body: &Value) -> Option<String> {
    let errors: Vec<ApiError> = serde_json::from_value(body.get("errors")?.clone()).ok()?;
    errors.into_iter().next().map(|e| e.message)
}

fn digest_header(resp: &Response) -> Option<String> {
    resp.headers()
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract the image from a legacy manifest body.
///
/// A body carrying `errors`, or a compatibility blob without an `id`, means the
/// tag has no resolvable image.
pub fn parse_image(
    repo: &str,
    tag: &str,
    manifest: Value,
) -> Result<Option<ImageDescriptor>, AppError> {
    let malformed = |message: String| AppError::MalformedManifest {
        repo: repo.to_string(),
        tag: tag.to_string(),
        message,
    };

    let manifest: LegacyManifest = serde_json::from_value(manifest)?;
    if manifest.errors.is_some() {
        return Ok(None);
    }

    let entry = manifest
        .history
        .first()
        .ok_or_else(|| malformed("manifest has no history".to_string()))?;
    let compat: V1Compatibility = serde_json::from_str(&entry.v1_compatibility)?;

    let Some(id) = compat.id else {
        return Ok(None);
    };
    let created_at = compat
        .created
        .ok_or_else(|| malformed(format!("image {} has no creation time", id)))?;

    Ok(Some(ImageDescriptor {
        id,
        created_at,
        repo: repo.to_string(),
        tag: tag.to_string(),
    }))
}
