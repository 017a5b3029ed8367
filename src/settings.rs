use std::collections::BTreeSet;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::cli::Cli;
use crate::error::AppError;
use crate::policy::TagMatcher;

pub const DEFAULT_INI: &str = "regretain.ini";
const ENV_PREFIX: &str = "REGRETAIN";

/// HTTP Basic credentials presented to the token authority
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Normalized token authority and registry base URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub jwt: String,
    pub registry: String,
}

impl Endpoints {
    pub fn new(jwt: &str, registry: &str) -> Self {
        Self {
            jwt: normalize_endpoint(jwt),
            registry: normalize_endpoint(registry),
        }
    }
}

/// Strip trailing slashes and default the scheme to https
pub fn normalize_endpoint(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Retention settings for one run
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub minimum_images: usize,
    pub retention_days: i64,
    pub tag_match: Option<TagMatcher>,
    pub clean_latest: bool,
    pub clean_all: bool,
    pub single_tag_only: bool,
    pub preserve_tags: BTreeSet<String>,
    pub dry_run: bool,
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.single_tag_only && !self.preserve_tags.is_empty() {
            return Err(AppError::ConflictingProtection);
        }
        Ok(())
    }

    /// Whether evaluation needs the complete id → tags map up front
    pub fn needs_co_tags(&self) -> bool {
        self.single_tag_only || !self.preserve_tags.is_empty()
    }
}

/// Everything the engine needs, resolved from INI, environment and flags
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub policy: PolicyConfig,
    pub repositories: Vec<String>,
    pub insecure_tls: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    gitlab: GitlabSection,
    #[serde(default)]
    cleanup: CleanupSection,
}

#[derive(Debug, Default, Deserialize)]
struct GitlabSection {
    user: Option<String>,
    password: Option<String>,
    jwt_url: Option<String>,
    registry_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CleanupSection {
    minimum_images: Option<u32>,
    retention_days: Option<u32>,
}

fn load_settings(cli: &Cli) -> Result<Settings, AppError> {
    let (path, required) = match &cli.ini {
        Some(path) => {
            if !path.is_file() {
                return Err(AppError::Config(format!(
                    "config {} not found",
                    path.display()
                )));
            }
            (path.as_path(), true)
        }
        None => (Path::new(DEFAULT_INI), false),
    };

    let settings = Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .set_override_option("gitlab.user", cli.user.clone())?
        .set_override_option("gitlab.password", cli.password.clone())?
        .set_override_option("gitlab.jwt_url", cli.jwt_url.clone())?
        .set_override_option("gitlab.registry_url", cli.registry_url.clone())?
        .set_override_option("cleanup.minimum_images", cli.minimum.map(i64::from))?
        .set_override_option("cleanup.retention_days", cli.days.map(i64::from))?
        .build()?;

    Ok(settings.try_deserialize()?)
}

fn required<T>(value: Option<T>, key: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::Config(format!("missing required setting '{}'", key)))
}

/// Merge INI, environment and command line into a validated run configuration
pub fn resolve(cli: &Cli) -> Result<RunConfig, AppError> {
    let settings = load_settings(cli)?;
    let gitlab = settings.gitlab;
    let cleanup = settings.cleanup;

    let tag_match = cli
        .tag_match
        .as_deref()
        .map(|pattern| TagMatcher::new(pattern, cli.regex, cli.negate))
        .transpose()?;

    let policy = PolicyConfig {
        minimum_images: required(cleanup.minimum_images, "cleanup.minimum_images")? as usize,
        retention_days: i64::from(required(cleanup.retention_days, "cleanup.retention_days")?),
        tag_match,
        clean_latest: cli.clean_latest,
        clean_all: cli.clean_all,
        single_tag_only: cli.single_tag,
        preserve_tags: cli.preserve_tag.iter().cloned().collect(),
        dry_run: cli.dry_run,
    };
    policy.validate()?;

    Ok(RunConfig {
        credentials: Credentials {
            username: required(gitlab.user, "gitlab.user")?,
            password: required(gitlab.password, "gitlab.password")?,
        },
        endpoints: Endpoints::new(
            &required(gitlab.jwt_url, "gitlab.jwt_url")?,
            &required(gitlab.registry_url, "gitlab.registry_url")?,
        ),
        policy,
        repositories: cli.repository.clone(),
        insecure_tls: cli.insecure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use clap::Parser;

    #[test]
    fn test_normalize_endpoint_strips_trailing_slashes() {
        assert_eq!(
            normalize_endpoint("https://gitlab.example.com/jwt/auth//"),
            "https://gitlab.example.com/jwt/auth"
        );
    }

    #[test]
    fn test_normalize_endpoint_defaults_scheme() {
        assert_eq!(
            normalize_endpoint("registry.example.com:5005/"),
            "https://registry.example.com:5005"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:5000"),
            "http://localhost:5000"
        );
    }

    #[test]
    fn test_single_tag_conflicts_with_preserve_tags() {
        let policy = PolicyConfig {
            single_tag_only: true,
            preserve_tags: BTreeSet::from(["stable".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(AppError::ConflictingProtection)
        ));
        assert!(policy.needs_co_tags());
    }

    #[test]
    fn test_resolve_from_command_line() {
        let cli = Cli::parse_from([
            "regretain",
            "--user",
            "ci",
            "--password",
            "secret",
            "--jwt-url",
            "gitlab.example.com/jwt/auth/",
            "--registry-url",
            "https://registry.example.com/",
            "-m",
            "3",
            "-d",
            "30",
            "-r",
            "group/app",
            "--preserve-tag",
            "stable",
        ]);
        let config = resolve(&cli).unwrap();
        assert_eq!(config.credentials.username, "ci");
        assert_eq!(config.endpoints.jwt, "https://gitlab.example.com/jwt/auth");
        assert_eq!(config.endpoints.registry, "https://registry.example.com");
        assert_eq!(config.policy.minimum_images, 3);
        assert_eq!(config.policy.retention_days, 30);
        assert_eq!(config.repositories, vec!["group/app".to_string()]);
        assert!(config.policy.preserve_tags.contains("stable"));
    }

    #[test]
    fn test_resolve_rejects_missing_ini() {
        let cli = Cli::parse_from(["regretain", "--ini", "/nonexistent/regretain.ini"]);
        assert!(matches!(resolve(&cli), Err(AppError::Config(_))));
    }

    #[test]
    fn test_resolve_rejects_conflicting_protection() {
        let cli = Cli::parse_from([
            "regretain",
            "--user",
            "ci",
            "--password",
            "secret",
            "--jwt-url",
            "https://gitlab.example.com/jwt/auth",
            "--registry-url",
            "https://registry.example.com",
            "-m",
            "1",
            "-d",
            "7",
            "--single-tag",
            "--preserve-tag",
            "stable",
        ]);
        assert!(matches!(
            resolve(&cli),
            Err(AppError::ConflictingProtection)
        ));
    }

    fn example_ini() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(include_str!("../regretain.ini.example").as_bytes())
            .unwrap();
        file
    }

    #[test]
    fn test_resolve_from_ini_file() {
        let ini = example_ini();
        let cli = Cli::parse_from(["regretain", "--ini", ini.path().to_str().unwrap()]);

        let config = resolve(&cli).unwrap();

        assert_eq!(config.credentials.username, "cleanup-bot");
        assert_eq!(config.endpoints.jwt, "https://gitlab.example.com/jwt/auth");
        assert_eq!(config.endpoints.registry, "https://registry.example.com");
        assert_eq!(config.policy.minimum_images, 5);
        assert_eq!(config.policy.retention_days, 30);
    }

    #[test]
    fn test_environment_overrides_ini() {
        let ini = example_ini();
        std::env::set_var("REGRETAIN__GITLAB__PASSWORD", "from-env");
        let cli = Cli::parse_from([
            "regretain",
            "--ini",
            ini.path().to_str().unwrap(),
            "-d",
            "14",
        ]);

        let config = resolve(&cli);
        std::env::remove_var("REGRETAIN__GITLAB__PASSWORD");
        let config = config.unwrap();

        assert_eq!(config.credentials.password, "from-env");
        assert_eq!(config.credentials.username, "cleanup-bot");
        assert_eq!(config.policy.minimum_images, 5);
        assert_eq!(config.policy.retention_days, 14);
    }
}
