use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sunset.toml";

/// Prefix for environment overrides, e.g. `SUNSET__RETENTION__DRY_RUN=true`.
pub const ENV_PREFIX: &str = "SUNSET__";

/// Page sizes per enforcement context.
///
/// Context keys match the action names used in logs and events:
/// `disable_users`, `delete_users`, `archive_post`, `archive_page`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSizeConfig {
    /// Env: SUNSET__RETENTION__BATCH_SIZES__DISABLE_USERS
    #[serde(default = "default_batch_size")]
    pub disable_users: usize,

    /// Env: SUNSET__RETENTION__BATCH_SIZES__DELETE_USERS
    #[serde(default = "default_delete_batch_size")]
    pub delete_users: usize,

    /// Env: SUNSET__RETENTION__BATCH_SIZES__ARCHIVE_POST
    #[serde(default = "default_batch_size")]
    pub archive_post: usize,

    /// Env: SUNSET__RETENTION__BATCH_SIZES__ARCHIVE_PAGE
    #[serde(default = "default_batch_size")]
    pub archive_page: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_delete_batch_size() -> usize {
    50 // deletes cascade in the host, keep them smaller
}

impl Default for BatchSizeConfig {
    fn default() -> Self {
        Self {
            disable_users: default_batch_size(),
            delete_users: default_delete_batch_size(),
            archive_post: default_batch_size(),
            archive_page: default_batch_size(),
        }
    }
}

impl BatchSizeConfig {
    /// Page size for an action context, never smaller than one.
    ///
    /// Unknown contexts fall back to the general default.
    pub fn for_context(&self, context: &str) -> usize {
        let size = match context {
            "disable_users" => self.disable_users,
            "delete_users" => self.delete_users,
            "archive_post" => self.archive_post,
            "archive_page" => self.archive_page,
            _ => default_batch_size(),
        };
        size.max(1)
    }
}

/// Enforcement configuration injected into the retention orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run scheduled enforcement at all.
    ///
    /// Env: SUNSET__RETENTION__ENABLED
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between scheduled runs.
    ///
    /// Env: SUNSET__RETENTION__INTERVAL
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Dry-run mode: evaluate and log actions without executing them.
    ///
    /// Env: SUNSET__RETENTION__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,

    /// Groups never touched by the user passes.
    ///
    /// Env: SUNSET__RETENTION__EXCLUDED_GROUPS
    #[serde(default = "default_excluded_groups")]
    pub excluded_groups: Vec<String>,

    /// Page sizes per action context.
    #[serde(default)]
    pub batch_sizes: BatchSizeConfig,

    /// A run lock older than this is considered abandoned and taken over.
    ///
    /// Env: SUNSET__RETENTION__RUN_LOCK_TIMEOUT
    #[serde(with = "humantime_serde", default = "default_run_lock_timeout")]
    pub run_lock_timeout: Duration,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(24 * 3600) // daily
}

fn default_excluded_groups() -> Vec<String> {
    vec!["administrator".to_string()]
}

fn default_run_lock_timeout() -> Duration {
    Duration::from_secs(6 * 3600)
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval: default_interval(),
            dry_run: false,
            excluded_groups: default_excluded_groups(),
            batch_sizes: BatchSizeConfig::default(),
            run_lock_timeout: default_run_lock_timeout(),
        }
    }
}

impl RetentionConfig {
    /// Validate the retention configuration.
    ///
    /// Checks:
    /// - The schedule interval is positive
    /// - The run lock timeout is positive
    /// - Excluded group keys are not blank
    pub fn validate(&self) -> Result<(), RetentionConfigError> {
        let zero = Duration::from_secs(0);

        if self.interval <= zero {
            return Err(RetentionConfigError::InvalidInterval(self.interval));
        }

        if self.run_lock_timeout <= zero {
            return Err(RetentionConfigError::InvalidRunLockTimeout(
                self.run_lock_timeout,
            ));
        }

        if let Some(index) = self
            .excluded_groups
            .iter()
            .position(|group| group.trim().is_empty())
        {
            return Err(RetentionConfigError::BlankExcludedGroup { index });
        }

        Ok(())
    }

    /// Excluded groups as normalized keys (trimmed, lowercase, no blanks).
    pub fn excluded_group_set(&self) -> BTreeSet<String> {
        self.excluded_groups
            .iter()
            .map(|group| group.trim().to_ascii_lowercase())
            .filter(|group| !group.is_empty())
            .collect()
    }

    /// Page size for an action context.
    pub fn batch_size(&self, context: &str) -> usize {
        self.batch_sizes.for_context(context)
    }
}

/// Location of the host snapshot used by the `sunset` binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON snapshot holding settings, subjects and content.
    ///
    /// Env: SUNSET__STORE__SNAPSHOT_PATH
    pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from(".data/sunset.json"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Enforcement behaviour (schedule, batch sizes, exclusions, dry run)
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Host store adapter settings
    #[serde(default)]
    pub store: StoreConfig,
}

impl Configuration {
    /// Load `sunset.toml` from the working directory, then `SUNSET__` env vars.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Load an explicit configuration file, then `SUNSET__` env vars.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

/// Errors that can occur during retention configuration validation.
#[derive(Error, Debug)]
pub enum RetentionConfigError {
    /// Invalid schedule interval (must be positive).
    #[error("Invalid retention interval: {0:?} must be positive")]
    InvalidInterval(Duration),

    /// Invalid run lock timeout (must be positive).
    #[error("Invalid run lock timeout: {0:?} must be positive")]
    InvalidRunLockTimeout(Duration),

    /// An excluded group entry is blank.
    #[error("Excluded group at index {index} is blank")]
    BlankExcludedGroup { index: usize },
}
