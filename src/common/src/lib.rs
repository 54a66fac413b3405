//! Shared configuration and CLI plumbing for the sunset binaries.

pub mod cli;
pub mod config;
