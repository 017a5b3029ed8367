use std::path::PathBuf;

use clap::Parser;

/// regretain — retention-based image cleaner for token-authenticated registries
#[derive(Parser, Debug)]
#[command(
    name = "regretain",
    version,
    about,
    after_help = "Registry credentials and retention defaults are read from the INI file"
)]
pub struct Cli {
    /// Use this INI file (default: regretain.ini)
    #[arg(short, long, value_name = "FILE")]
    pub ini: Option<PathBuf>,

    /// Scan only these repositories (repeatable)
    #[arg(short, long, value_name = "namespace/project")]
    pub repository: Vec<String>,

    /// Minimum number of images to keep per repository (overrides INI value)
    #[arg(short, long, value_name = "X")]
    pub minimum: Option<u32>,

    /// Delete images older than this many days (overrides INI value)
    #[arg(short, long, value_name = "X")]
    pub days: Option<u32>,

    /// Only consider tags matching this pattern (substring unless --regex)
    #[arg(long, value_name = "PATTERN")]
    pub tag_match: Option<String>,

    /// Treat --tag-match as a regex anchored at the start of the tag
    #[arg(long, requires = "tag_match")]
    pub regex: bool,

    /// Invert --tag-match
    #[arg(long, requires = "tag_match")]
    pub negate: bool,

    /// Allow the "latest" tag and images sharing its id to be deleted
    #[arg(long)]
    pub clean_latest: bool,

    /// Delete all matching images in the repository, ignoring age and minimum (DANGER!)
    #[arg(long)]
    pub clean_all: bool,

    /// Never delete an image that is referenced by more than one tag
    #[arg(long)]
    pub single_tag: bool,

    /// Never delete this tag or the image behind it (repeatable)
    #[arg(long, value_name = "TAG")]
    pub preserve_tag: Vec<String>,

    /// Log what would be deleted without deleting
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Accept invalid TLS certificates
    #[arg(long, default_value_t = false)]
    pub insecure: bool,

    /// Registry user (overrides INI value)
    #[arg(long, env = "REGRETAIN_USER")]
    pub user: Option<String>,

    /// Registry password or CI token (overrides INI value)
    #[arg(long, env = "REGRETAIN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Token authority URL (overrides INI value)
    #[arg(long, env = "REGRETAIN_JWT_URL")]
    pub jwt_url: Option<String>,

    /// Registry URL (overrides INI value)
    #[arg(long, env = "REGRETAIN_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Debug output
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}
