//! Berth Core Library
//!
//! Core types, configuration and errors shared by the Berth join tooling.

pub mod config;
pub mod error;
pub mod types;

pub use config::BerthConfig;
pub use error::{Error, Result};

/// Berth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the marker file recording a completed join, relative to the data directory
pub const JOIN_MARKER_FILE: &str = "join";

/// Subdirectory the consensus engine keeps its own replicated state in
pub const MEMBER_DATA_DIR: &str = "member";

/// Default name of the cluster-wide join lock
pub const DEFAULT_JOIN_LOCK: &str = "/berth/join";
