//! Image engine capability.
//!
//! The pipeline never looks inside an image. It decodes buffered bytes into an
//! opaque [`ImageHandle`] through an [`ImageCodec`], mutates the handle with the
//! engine primitives, and finally asks the handle to encode itself.
//!
//! ```text
//! ImageCodec::decode(bytes) ──▶ Box<dyn ImageHandle>
//!                                  │ set_format / set_colorspace / set_interlace
//!                                  │ set_quality / strip / resize
//!                                  ▼
//!                              encode() ──▶ bytes
//! ```
//!
//! [`RasterCodec`] is the production engine, built on the `image` crate.

mod error;
mod params;
mod raster;

pub use error::{EngineError, Severity};
pub use params::{Colorspace, FilterType, Interlace, UnknownName};
pub use raster::{RasterCodec, RasterImage};

use std::collections::BTreeMap;

/// Largest resize blur factor an engine is asked to apply.
pub const MAX_BLUR: f64 = 16.0;

/// Snapshot of the observable state of a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleProperties {
    /// Output format name the handle will encode to (e.g. "png").
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub quality: Option<u8>,
    pub colorspace: Option<Colorspace>,
    pub interlace: Option<Interlace>,
    /// Whether auxiliary metadata (profiles, comments) is still attached.
    pub has_metadata: bool,
}

/// A decoded image, mutable in place.
pub trait ImageHandle: Send {
    fn properties(&self) -> HandleProperties;

    fn set_format(&mut self, format: &str) -> Result<(), EngineError>;

    fn set_colorspace(&mut self, colorspace: Colorspace) -> Result<(), EngineError>;

    fn set_interlace(&mut self, interlace: Interlace) -> Result<(), EngineError>;

    fn set_quality(&mut self, quality: u8) -> Result<(), EngineError>;

    /// Remove auxiliary metadata.
    fn strip(&mut self) -> Result<(), EngineError>;

    fn resize(
        &mut self,
        columns: u32,
        rows: u32,
        filter: FilterType,
        blur: f64,
    ) -> Result<(), EngineError>;

    /// Serialize the image in its current output format.
    fn encode(&self) -> Result<Vec<u8>, EngineError>;
}

/// Factory side of the engine.
pub trait ImageCodec: Send + Sync {
    /// Returns the name of this engine for logging.
    fn name(&self) -> &'static str;

    fn decode(
        &self,
        bytes: &[u8],
        options: &DecodeOptions,
    ) -> Result<Box<dyn ImageHandle>, EngineError>;

    /// MIME type served for an output format, if the engine knows it.
    fn mime_for_format(&self, format: &str) -> Option<String>;
}

/// Engine options applied before decoding, keyed by `(format, key)`.
///
/// Mirrors the `format:key=value` define convention, e.g. `jpeg:quality`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    entries: BTreeMap<(String, String), String>,
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, format: impl Into<String>, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert((format.into(), key.into()), value.into());
    }

    pub fn get(&self, format: &str, key: &str) -> Option<&str> {
        self.entries
            .get(&(format.to_string(), key.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries
            .iter()
            .map(|((format, key), value)| (format.as_str(), key.as_str(), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_options_lookup_by_format_and_key() {
        let mut options = DecodeOptions::new();
        options.set("jpeg", "quality", "70");
        options.set("png", "quality", "9");

        assert_eq!(options.get("jpeg", "quality"), Some("70"));
        assert_eq!(options.get("png", "quality"), Some("9"));
        assert_eq!(options.get("gif", "quality"), None);
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn later_set_replaces_value() {
        let mut options = DecodeOptions::new();
        options.set("jpeg", "quality", "70");
        options.set("jpeg", "quality", "80");
        assert_eq!(options.iter().collect::<Vec<_>>(), vec![("jpeg", "quality", "80")]);
    }
}
