//! Configuration module for dbkeeper
//!
//! This module provides configuration management including:
//! - Application data path resolution
//! - Rotation settings persistence

pub mod paths;
pub mod settings;

pub use paths::KeeperPaths;
pub use settings::{RotationLimits, RotationSettings, Settings};
