use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::stage::StageKind;

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings every location inherits.
    pub pipeline: ScopeConfig,
    #[serde(rename = "location")]
    pub locations: Vec<LocationConfig>,
}

/// Settings for URIs under `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// URI path prefix (e.g. "/thumbs/").
    pub path: String,
    #[serde(flatten)]
    pub scope: ScopeConfig,
}

/// One configuration scope. Unset knobs inherit from the parent scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Stages to run, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageKind>>,
    /// Cap on the buffered source image (default 10 MiB).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
    /// Decode options, `"format:key"` to value expression.
    pub options: BTreeMap<String, String>,
    pub format: Vec<String>,
    pub colorspace: Vec<String>,
    pub interlace: Vec<String>,
    pub quality: Vec<String>,
    pub resize: ResizeConfig,
}

/// Resize knobs. Expression lists are tried in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    pub filter_type: Vec<String>,
    pub blur: Vec<String>,
    pub factor: Vec<String>,
    /// Round output dimensions up to a multiple of this (default 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u32>,
}
