use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::index::RepositoryIndex;
use crate::models::{DeleteOutcome, DeletionCandidate, DeletionReason, ImageDescriptor};
use crate::registry::Registry;
use crate::settings::PolicyConfig;

pub const LATEST: &str = "latest";

#[derive(Debug, Clone)]
enum TagPattern {
    Substring(String),
    /// Compiled as `^(?:pattern)`, so a match must start at the first character
    Prefix(Regex),
}

/// Tag filter from `--tag-match`, `--regex` and `--negate`
#[derive(Debug, Clone)]
pub struct TagMatcher {
    pattern: TagPattern,
    negate: bool,
}

impl TagMatcher {
    pub fn new(pattern: &str, is_regex: bool, negate: bool) -> Result<Self, AppError> {
        let pattern = if is_regex {
            TagPattern::Prefix(Regex::new(&format!("^(?:{})", pattern))?)
        } else {
            TagPattern::Substring(pattern.to_string())
        };
        Ok(Self { pattern, negate })
    }

    pub fn matches(&self, tag: &str) -> bool {
        let hit = match &self.pattern {
            TagPattern::Substring(s) => tag.contains(s.as_str()),
            TagPattern::Prefix(re) => re.is_match(tag),
        };
        hit != self.negate
    }
}

/// Apply the tag filter and drop `latest` unless it may be cleaned
pub fn filter_tags(tags: &[String], config: &PolicyConfig) -> Vec<String> {
    tags.iter()
        .filter(|t| config.tag_match.as_ref().is_none_or(|m| m.matches(t)))
        .filter(|t| config.clean_latest || t.as_str() != LATEST)
        .cloned()
        .collect()
}

/// Whole days between `created_at` and `now`
pub fn age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days()
}

/// Incremental retention evaluation for one repository.
///
/// Candidates come out in listing order. On the age path each emitted
/// candidate counts against the remaining tags until the outcome is settled;
/// the scan stops once the remaining count reaches `minimum_images`.
pub struct RetentionScan<'c> {
    config: &'c PolicyConfig,
    now: DateTime<Utc>,
    all_tags: Vec<String>,
    filtered: Vec<String>,
    position: usize,
    remaining: usize,
    latest_id: Option<String>,
    prepared: bool,
}

impl<'c> RetentionScan<'c> {
    pub fn new(tags: &[String], config: &'c PolicyConfig, now: DateTime<Utc>) -> Self {
        let filtered = filter_tags(tags, config);
        Self {
            config,
            now,
            all_tags: tags.to_vec(),
            remaining: filtered.len(),
            filtered,
            position: 0,
            latest_id: None,
            prepared: false,
        }
    }

    pub fn filtered(&self) -> &[String] {
        &self.filtered
    }

    /// Produce the next deletion candidate, or None when the scan is done
    pub async fn next<R: Registry + ?Sized>(
        &mut self,
        index: &mut RepositoryIndex<'_, R>,
    ) -> Result<Option<DeletionCandidate>, AppError> {
        if self.config.clean_all {
            let Some(tag) = self.filtered.get(self.position).cloned() else {
                return Ok(None);
            };
            self.position += 1;
            return Ok(Some(DeletionCandidate {
                tag,
                image_id: None,
                reason: DeletionReason::CleanAll,
            }));
        }

        if !self.prepared {
            self.prepare(index).await?;
        }

        while self.position < self.filtered.len() && self.remaining > self.config.minimum_images {
            let tag = self.filtered[self.position].clone();
            self.position += 1;

            let Some(image) = index.image(&tag).await? else {
                debug!("{}:{} has no image, skipping", index.repo(), tag);
                continue;
            };
            if self.is_protected(&image, index) {
                continue;
            }

            let age = age_days(image.created_at, self.now);
            debug!(
                "Tag {} with image id {} days diff: {}",
                tag, image.id, age
            );
            if age > self.config.retention_days {
                warn!(
                    "- DELETE: {}:{}, created at {}, ({} days ago)",
                    index.repo(),
                    tag,
                    image.created_at.format("%Y-%m-%d %H:%M:%S"),
                    age
                );
                self.remaining -= 1;
                return Ok(Some(DeletionCandidate {
                    tag,
                    image_id: Some(image.id),
                    reason: DeletionReason::Expired,
                }));
            }
        }

        Ok(None)
    }

    /// Feed back the outcome of deleting the last candidate
    pub fn settle(&mut self, candidate: &DeletionCandidate, outcome: DeleteOutcome) {
        if candidate.reason == DeletionReason::Expired && !outcome.removed() {
            // The tag is still there and still counts toward the floor
            self.remaining += 1;
        }
    }

    async fn prepare<R: Registry + ?Sized>(
        &mut self,
        index: &mut RepositoryIndex<'_, R>,
    ) -> Result<(), AppError> {
        if !self.config.clean_latest {
            self.latest_id = index.image(LATEST).await?.map(|image| image.id);
            debug!("Latest ID: {:?}", self.latest_id);
        }
        if self.config.needs_co_tags() {
            index.populate(&self.all_tags).await?;
        }
        self.prepared = true;
        Ok(())
    }

    fn is_protected<R: Registry + ?Sized>(
        &self,
        image: &ImageDescriptor,
        index: &RepositoryIndex<'_, R>,
    ) -> bool {
        let repo = index.repo();
        let tag = image.tag.as_str();

        if !self.config.clean_latest && self.latest_id.as_deref() == Some(image.id.as_str()) {
            info!("Keep {}:{}, same image as {}", repo, tag, LATEST);
            return true;
        }

        if !self.config.preserve_tags.is_empty() {
            if self.config.preserve_tags.contains(tag) {
                info!("Keep {}:{}, preserved tag", repo, tag);
                return true;
            }
            let co_tags = index.co_tags(&image.id, tag);
            if let Some(preserved) = co_tags.iter().find(|t| self.config.preserve_tags.contains(*t)) {
                info!("Keep {}:{}, shares image with preserved tag {}", repo, tag, preserved);
                return true;
            }
        }

        if self.config.single_tag_only {
            let co_tags = index.co_tags(&image.id, tag);
            if !co_tags.is_empty() {
                info!(
                    "Keep {}:{}, image also tagged {:?}",
                    repo, tag, co_tags
                );
                return true;
            }
        }

        false
    }
}
