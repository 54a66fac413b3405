//! Retention configuration builder for tests.

use common::config::RetentionConfig;
use std::time::Duration;

/// Builder for [`RetentionConfig`] values used in tests.
///
/// Starts from the defaults: administrators excluded, production batch
/// sizes, dry run off.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: RetentionConfig,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RetentionConfig::default(),
        }
    }

    /// Set one batch-size context (`disable_users`, `delete_users`,
    /// `archive_post`, `archive_page`).
    pub fn batch_size(mut self, context: &str, size: usize) -> Self {
        let sizes = &mut self.config.batch_sizes;
        match context {
            "disable_users" => sizes.disable_users = size,
            "delete_users" => sizes.delete_users = size,
            "archive_post" => sizes.archive_post = size,
            "archive_page" => sizes.archive_page = size,
            other => panic!("unknown batch size context: {other}"),
        }
        self
    }

    /// Same batch size for every context.
    pub fn uniform_batch_size(self, size: usize) -> Self {
        self.batch_size("disable_users", size)
            .batch_size("delete_users", size)
            .batch_size("archive_post", size)
            .batch_size("archive_page", size)
    }

    pub fn dry_run(mut self) -> Self {
        self.config.dry_run = true;
        self
    }

    pub fn excluded_groups(mut self, groups: &[&str]) -> Self {
        self.config.excluded_groups = groups.iter().map(|group| group.to_string()).collect();
        self
    }

    pub fn run_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_lock_timeout = timeout;
        self
    }

    pub fn build(self) -> RetentionConfig {
        self.config
    }
}
