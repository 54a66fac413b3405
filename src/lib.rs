//! Sunset
//!
//! Time-based retention for user accounts and published content. The policy
//! evaluation and batch enforcement engine lives in [`engine`]; configuration
//! and CLI plumbing shared by the binaries live in [`common`].

pub use common;
pub use engine;
