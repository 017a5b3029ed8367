use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

/// Token authority response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: Option<String>,
}

/// One entry of the `errors` array the registry returns alongside 4xx bodies
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// GET /v2/_catalog response
#[derive(Debug, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// GET /v2/<repo>/tags/list response
#[derive(Debug, Default, Deserialize)]
#[allow(dead_code)]
pub struct TagList {
    #[serde(default)]
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// GET /v2/<repo>/manifests/<tag> (legacy schema 1)
#[derive(Debug, Deserialize)]
pub struct LegacyManifest {
    #[serde(default)]
    pub errors: Option<Vec<ApiError>>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// The JSON document embedded as a string in `history[0].v1Compatibility`
#[derive(Debug, Deserialize)]
pub struct V1Compatibility {
    pub id: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// An image resolved from a tag's manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub repo: String,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    Expired,
    CleanAll,
}

/// A tag selected for deletion by the retention policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    pub tag: String,
    pub image_id: Option<String>,
    pub reason: DeletionReason,
}

/// What happened when a delete was attempted for one tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    DryRun,
    /// The tag no longer resolves to a digest
    NotFound,
    Rejected(StatusCode),
}

impl DeleteOutcome {
    /// Whether a delete request was issued (dry-run counts as issued)
    pub fn issued(self) -> bool {
        !matches!(self, DeleteOutcome::NotFound)
    }

    /// Whether the tag can be considered gone from the repository
    pub fn removed(self) -> bool {
        !matches!(self, DeleteOutcome::Rejected(_))
    }
}

/// Per-repository counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoReport {
    pub repository: String,
    pub deleted: usize,
    pub not_found: usize,
    pub rejected: usize,
    pub failed: bool,
}

/// Result of a full run across repositories
#[derive(Debug, Default)]
pub struct RunSummary {
    pub repos: Vec<RepoReport>,
    pub images_deleted: usize,
}

impl RunSummary {
    pub fn failed_repos(&self) -> usize {
        self.repos.iter().filter(|r| r.failed).count()
    }
}
