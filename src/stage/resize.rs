//! Resize with per-request geometry.
//!
//! Columns and rows are resolved independently and scaled by `factor`. A
//! missing dimension (0) is derived from the source aspect ratio, then both
//! are rounded up to a multiple of `modulus`. When both resolve to 0 the
//! image is left alone.

use crate::artifact::DeferredArtifact;
use crate::codec::{FilterType, MAX_BLUR};
use crate::options::{ExpressionList, OptionResolver, OptionValue, RequestContext};
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

const DEFAULT_BLUR: f64 = 1.0;
const DEFAULT_FACTOR: f64 = 1.0;

/// Resize parameters; every knob except `modulus` is an expression list.
#[derive(Debug, Clone)]
pub struct ResizeSettings {
    pub columns: ExpressionList,
    pub rows: ExpressionList,
    pub filter_type: ExpressionList,
    pub blur: ExpressionList,
    pub factor: ExpressionList,
    pub modulus: u32,
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            columns: ExpressionList::new(),
            rows: ExpressionList::new(),
            filter_type: ExpressionList::new(),
            blur: ExpressionList::new(),
            factor: ExpressionList::new(),
            modulus: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResizeStage {
    settings: ResizeSettings,
}

impl ResizeStage {
    pub fn new(settings: ResizeSettings) -> Self {
        Self { settings }
    }
}

fn parse_blur(raw: &str) -> Result<f64, String> {
    let value = f64::parse_value(raw)?;
    if value < 0.0 {
        return Err("must not be negative".to_string());
    }
    if value > MAX_BLUR {
        return Err(format!("must not exceed {MAX_BLUR}"));
    }
    Ok(value)
}

fn parse_factor(raw: &str) -> Result<f64, String> {
    let value = f64::parse_value(raw)?;
    if value <= 0.0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(value)
}

fn scale(value: u32, factor: f64) -> u32 {
    // `as` saturates for out-of-range floats.
    (f64::from(value) * factor) as u32
}

fn round_up(value: u32, modulus: u32) -> u32 {
    if modulus <= 1 {
        return value;
    }
    let rem = value % modulus;
    if rem == 0 {
        value
    } else {
        value.saturating_add(modulus - rem)
    }
}

/// Compute the output geometry for a `width`x`height` source.
///
/// Returns `None` when both requested dimensions are 0.
pub fn target_geometry(
    width: u32,
    height: u32,
    columns: u32,
    rows: u32,
    factor: f64,
    modulus: u32,
) -> Option<(u32, u32)> {
    let mut columns = scale(columns, factor);
    let mut rows = scale(rows, factor);

    match (columns, rows) {
        (0, 0) => return None,
        (c, 0) => {
            let derived = u64::from(c) * u64::from(height) / u64::from(width.max(1));
            rows = u32::try_from(derived).unwrap_or(u32::MAX).max(1);
        }
        (0, r) => {
            let derived = u64::from(r) * u64::from(width) / u64::from(height.max(1));
            columns = u32::try_from(derived).unwrap_or(u32::MAX).max(1);
        }
        _ => {}
    }

    Some((round_up(columns, modulus), round_up(rows, modulus)))
}

impl TransformStage for ResizeStage {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        _effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        let s = &self.settings;
        let columns = OptionResolver::new("columns", &s.columns).resolve::<u32>(ctx).or(0);
        let rows = OptionResolver::new("rows", &s.rows).resolve::<u32>(ctx).or(0);
        let filter = OptionResolver::new("filter_type", &s.filter_type)
            .resolve::<FilterType>(ctx)
            .or(FilterType::default());
        let blur = OptionResolver::new("blur", &s.blur)
            .resolve_with(ctx, parse_blur)
            .or(DEFAULT_BLUR);
        let factor = OptionResolver::new("factor", &s.factor)
            .resolve_with(ctx, parse_factor)
            .or(DEFAULT_FACTOR);
        let modulus = s.modulus;

        mutate_handle(self.name(), artifact, ctx, |handle| {
            let source = handle.properties();
            let Some((width, height)) =
                target_geometry(source.width, source.height, columns, rows, factor, modulus)
            else {
                tracing::debug!(request_id = %ctx.request_id, "No resize geometry, image unchanged");
                return Ok(());
            };

            tracing::debug!(
                request_id = %ctx.request_id,
                source_width = source.width,
                source_height = source.height,
                width,
                height,
                filter = %filter,
                blur,
                "Resizing image"
            );
            handle.resize(width, height, filter, blur)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeOptions, ImageCodec, RasterCodec};
    use crate::options::{Expression, Template};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    fn list(items: &[&str]) -> ExpressionList {
        items
            .iter()
            .map(|s| Arc::new(Template::parse(s).unwrap()) as Arc<dyn Expression>)
            .collect()
    }

    fn artifact(width: u32, height: u32) -> DeferredArtifact {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([80, 80, 80])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        DeferredArtifact::wrap(RasterCodec.decode(&png, &DecodeOptions::new()).unwrap())
    }

    fn dims(art: &DeferredArtifact) -> (u32, u32) {
        let p = art.properties().unwrap();
        (p.width, p.height)
    }

    #[test]
    fn derives_missing_dimension_from_aspect() {
        assert_eq!(target_geometry(200, 100, 100, 0, 1.0, 1), Some((100, 50)));
        assert_eq!(target_geometry(200, 100, 0, 25, 1.0, 1), Some((50, 25)));
    }

    #[test]
    fn rounds_up_to_modulus() {
        assert_eq!(target_geometry(300, 300, 101, 101, 1.0, 8), Some((104, 104)));
        assert_eq!(target_geometry(300, 300, 96, 96, 1.0, 8), Some((96, 96)));
    }

    #[test]
    fn factor_scales_requested_dimensions() {
        assert_eq!(target_geometry(200, 100, 100, 0, 0.5, 1), Some((50, 25)));
        assert_eq!(target_geometry(10, 10, 3, 3, 1.5, 1), Some((4, 4)));
    }

    #[test]
    fn zero_geometry_is_none() {
        assert_eq!(target_geometry(200, 100, 0, 0, 1.0, 1), None);
        // Factor can truncate a request down to nothing.
        assert_eq!(target_geometry(200, 100, 1, 0, 0.5, 1), None);
    }

    #[test]
    fn derived_dimension_is_at_least_one() {
        assert_eq!(target_geometry(1000, 1, 10, 0, 1.0, 1), Some((10, 1)));
    }

    #[test]
    fn resizes_with_resolved_columns() {
        let art = artifact(20, 10);
        let settings = ResizeSettings {
            columns: list(&["%{query:w}", "8"]),
            ..ResizeSettings::default()
        };
        ResizeStage::new(settings)
            .apply(&art, &RequestContext::new("/img?w=10"), &mut HostEffects::default())
            .unwrap();
        assert_eq!(dims(&art), (10, 5));
    }

    #[test]
    fn no_geometry_leaves_image_alone() {
        let art = artifact(20, 10);
        ResizeStage::new(ResizeSettings::default())
            .apply(&art, &RequestContext::new("/"), &mut HostEffects::default())
            .unwrap();
        assert_eq!(dims(&art), (20, 10));
    }

    #[test]
    fn invalid_factor_falls_back_to_default() {
        assert!(parse_factor("0").is_err());
        assert!(parse_factor("-2").is_err());
        assert!(parse_blur("-0.5").is_err());
        assert_eq!(parse_blur("0"), Ok(0.0));
    }

    #[test]
    fn oversized_blur_falls_back_to_default() {
        assert!(parse_blur("100000").is_err());
        assert_eq!(parse_blur("16"), Ok(MAX_BLUR));
    }
}
