//! Test utilities for the retention engine.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! engine = { path = "../engine", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use engine::testing::{SubjectBuilder, TestConfigBuilder, days_ago, fixed_now};
//!
//! let subject = SubjectBuilder::new(1).last_active(days_ago(40)).build();
//! let config = TestConfigBuilder::new().batch_size("disable_users", 2).build();
//! ```

mod config_builder;
mod fixtures;
mod flaky;
mod observer;

pub use config_builder::TestConfigBuilder;
pub use fixtures::{ContentBuilder, SubjectBuilder, days_ago, fixed_now};
pub use flaky::FlakyStore;
pub use observer::RecordingObserver;
