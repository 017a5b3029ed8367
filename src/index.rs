use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::AppError;
use crate::models::ImageDescriptor;
use crate::registry::Registry;

/// Per-repository image knowledge, built up while one repository is processed.
///
/// `image_by_tag` memoizes manifest lookups, including tags that resolve to no
/// image. `tags_by_image_id` is only filled for resolved tags, so every tag it
/// lists maps back to an image with that id.
pub struct RepositoryIndex<'a, R: Registry + ?Sized> {
    registry: &'a R,
    repo: String,
    image_by_tag: HashMap<String, Option<ImageDescriptor>>,
    tags_by_image_id: HashMap<String, BTreeSet<String>>,
}

impl<'a, R: Registry + ?Sized> RepositoryIndex<'a, R> {
    pub fn new(registry: &'a R, repo: &str) -> Self {
        Self {
            registry,
            repo: repo.to_string(),
            image_by_tag: HashMap::new(),
            tags_by_image_id: HashMap::new(),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Resolve the image behind `tag`, fetching its manifest at most once per pass
    pub async fn image(&mut self, tag: &str) -> Result<Option<ImageDescriptor>, AppError> {
        if let Some(cached) = self.image_by_tag.get(tag) {
            return Ok(cached.clone());
        }

        let image = self.registry.get_image(&self.repo, tag).await?;
        if let Some(found) = &image {
            debug!("{}:{} has image id {}", found.repo, found.tag, found.id);
            self.tags_by_image_id
                .entry(found.id.clone())
                .or_default()
                .insert(tag.to_string());
        }
        self.image_by_tag.insert(tag.to_string(), image.clone());
        Ok(image)
    }

    /// Resolve every tag so co-tag lookups see the whole repository
    pub async fn populate(&mut self, tags: &[String]) -> Result<(), AppError> {
        for tag in tags {
            self.image(tag).await?;
        }
        debug!(
            "Indexed {} tags across {} images in {}",
            self.image_by_tag.len(),
            self.tags_by_image_id.len(),
            self.repo
        );
        Ok(())
    }

    /// Other tags known to point at `image_id`
    pub fn co_tags(&self, image_id: &str, tag: &str) -> BTreeSet<String> {
        self.tags_by_image_id
            .get(image_id)
            .map(|tags| tags.iter().filter(|t| *t != tag).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use reqwest::StatusCode;

    use crate::error::AppError;
    use crate::models::{DeleteOutcome, ImageDescriptor};
    use crate::registry::Registry;

    /// In-memory registry for engine tests
    #[derive(Default)]
    pub struct FakeRegistry {
        pub now: DateTime<Utc>,
        pub tags: HashMap<String, Vec<String>>,
        pub images: HashMap<(String, String), (String, i64)>,
        pub failing_repos: HashSet<String>,
        pub rejecting_tags: HashSet<String>,
        pub image_calls: Mutex<Vec<String>>,
        pub deleted: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        pub fn new(now: DateTime<Utc>) -> Self {
            Self {
                now,
                ..Default::default()
            }
        }

        /// Add a tag pointing at `id`, created `age_days` days before `now`
        pub fn tag(mut self, repo: &str, tag: &str, id: &str, age_days: i64) -> Self {
            self.tags
                .entry(repo.to_string())
                .or_default()
                .push(tag.to_string());
            self.images
                .insert((repo.to_string(), tag.to_string()), (id.to_string(), age_days));
            self
        }

        /// Add a listed tag whose manifest cannot be resolved
        pub fn dangling_tag(mut self, repo: &str, tag: &str) -> Self {
            self.tags
                .entry(repo.to_string())
                .or_default()
                .push(tag.to_string());
            self
        }

        pub fn failing(mut self, repo: &str) -> Self {
            self.failing_repos.insert(repo.to_string());
            self
        }

        pub fn rejecting(mut self, tag: &str) -> Self {
            self.rejecting_tags.insert(tag.to_string());
            self
        }

        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }

        pub fn image_calls(&self) -> Vec<String> {
            self.image_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn list_catalog(&self) -> Result<Vec<String>, AppError> {
            let mut repos: Vec<String> = self.tags.keys().cloned().collect();
            repos.extend(self.failing_repos.iter().cloned());
            repos.sort();
            repos.dedup();
            Ok(repos)
        }

        async fn list_tags(&self, repo: &str) -> Result<Vec<String>, AppError> {
            if self.failing_repos.contains(repo) {
                return Err(AppError::UnexpectedStatus {
                    method: "GET",
                    url: format!("https://registry.test/v2/{}/tags/list", repo),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(self.tags.get(repo).cloned().unwrap_or_default())
        }

        async fn get_image(
            &self,
            repo: &str,
            tag: &str,
        ) -> Result<Option<ImageDescriptor>, AppError> {
            self.image_calls.lock().unwrap().push(tag.to_string());
            Ok(self
                .images
                .get(&(repo.to_string(), tag.to_string()))
                .map(|(id, age)| ImageDescriptor {
                    id: id.clone(),
                    created_at: self.now - Duration::days(*age) - Duration::hours(1),
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                }))
        }

        async fn delete_image(&self, repo: &str, tag: &str) -> Result<DeleteOutcome, AppError> {
            if self.rejecting_tags.contains(tag) {
                return Ok(DeleteOutcome::Rejected(StatusCode::METHOD_NOT_ALLOWED));
            }
            if !self.images.contains_key(&(repo.to_string(), tag.to_string())) {
                return Ok(DeleteOutcome::NotFound);
            }
            self.deleted.lock().unwrap().push(tag.to_string());
            Ok(DeleteOutcome::Deleted)
        }
    }
}
