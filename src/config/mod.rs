//! TOML configuration: a root pipeline scope plus per-location overrides.
//!
//! Scopes are merged parent-to-child with [`ScopeConfig::merge`] and compiled
//! into a [`PipelineConfig`](crate::pipeline::PipelineConfig) once per
//! resolved location.

mod loader;
mod merge;
mod types;

pub use loader::ConfigError;
pub use types::{Config, LocationConfig, ResizeConfig, ScopeConfig};
