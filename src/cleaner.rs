use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::index::RepositoryIndex;
use crate::models::{DeleteOutcome, RepoReport, RunSummary};
use crate::policy::RetentionScan;
use crate::registry::Registry;
use crate::settings::PolicyConfig;

/// Drives retention across repositories, one repository at a time
pub struct Cleaner<'a, R: Registry + ?Sized> {
    registry: &'a R,
    policy: &'a PolicyConfig,
}

impl<'a, R: Registry + ?Sized> Cleaner<'a, R> {
    pub fn new(registry: &'a R, policy: &'a PolicyConfig) -> Self {
        Self { registry, policy }
    }

    /// Process the given repositories, or the whole catalog when none are given.
    ///
    /// Only token and catalog failures abort the run; anything that goes wrong
    /// inside one repository is logged and reported on that repository.
    pub async fn run(&self, repositories: &[String]) -> Result<RunSummary, AppError> {
        let catalog = if repositories.is_empty() {
            debug!("No --repository specified, fetching catalog...");
            self.registry.list_catalog().await?
        } else {
            repositories.to_vec()
        };
        info!("Found {} repositories", catalog.len());

        let mut summary = RunSummary::default();
        for repo in &catalog {
            let report = self.clean_repository(repo, Utc::now()).await?;
            summary.images_deleted += report.deleted;
            summary.repos.push(report);
        }
        Ok(summary)
    }

    /// Apply the retention policy to one repository
    pub async fn clean_repository(
        &self,
        repo: &str,
        now: DateTime<Utc>,
    ) -> Result<RepoReport, AppError> {
        let mut report = RepoReport {
            repository: repo.to_string(),
            ..Default::default()
        };
        info!("SCAN repository: {}", repo);

        let tags = match self.registry.list_tags(repo).await {
            Ok(tags) => tags,
            Err(e @ AppError::Auth { .. }) => return Err(e),
            Err(e) => {
                error!("Failed to list tags for {}: {}", repo, e);
                report.failed = true;
                return Ok(report);
            }
        };
        if tags.is_empty() {
            info!("No tags found for {}", repo);
            return Ok(report);
        }
        debug!("Tags ({}): {:?}", tags.len(), tags);

        if let Err(e) = self.apply(repo, &tags, now, &mut report).await {
            if matches!(e, AppError::Auth { .. }) {
                return Err(e);
            }
            error!("Failed to clean {}: {}", repo, e);
            report.failed = true;
        }

        info!(
            "{}: {} images deleted, {} already gone, {} rejected",
            repo, report.deleted, report.not_found, report.rejected
        );
        Ok(report)
    }

    async fn apply(
        &self,
        repo: &str,
        tags: &[String],
        now: DateTime<Utc>,
        report: &mut RepoReport,
    ) -> Result<(), AppError> {
        let mut index = RepositoryIndex::new(self.registry, repo);
        let mut scan = RetentionScan::new(tags, self.policy, now);

        if self.policy.clean_all {
            warn!(
                "!!! CLEAN ALL IMAGES in {} ({} tags) !!!",
                repo,
                scan.filtered().len()
            );
        }

        while let Some(candidate) = scan.next(&mut index).await? {
            if self.policy.clean_all {
                warn!("- DELETE: {}:{}", repo, candidate.tag);
            }

            debug!(
                "Deleting {}:{} (image {:?}, {:?})",
                repo, candidate.tag, candidate.image_id, candidate.reason
            );
            let outcome = self.registry.delete_image(repo, &candidate.tag).await?;
            debug!("Delete of {}:{} issued: {}", repo, candidate.tag, outcome.issued());
            match outcome {
                DeleteOutcome::Deleted | DeleteOutcome::DryRun => report.deleted += 1,
                DeleteOutcome::NotFound => {
                    info!("{}:{} was already gone", repo, candidate.tag);
                    report.not_found += 1;
                }
                DeleteOutcome::Rejected(status) => {
                    error!(
                        "Registry refused to delete {}:{} (status {})",
                        repo, candidate.tag, status
                    );
                    report.rejected += 1;
                }
            }
            scan.settle(&candidate, outcome);
        }
        Ok(())
    }
}
