//! Raster engine backed by the `image` crate.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::OnceLock;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType as Resampling;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageFormat, ImageReader, Limits};

use super::{
    Colorspace, DecodeOptions, EngineError, FilterType, HandleProperties, ImageCodec, ImageHandle,
    Interlace, Severity, MAX_BLUR,
};

/// Quality used for JPEG output when nothing else was requested.
const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Resampling works on an RGBA f32 intermediate, whatever the pixel type.
const RESAMPLE_BYTES_PER_PIXEL: u64 = 16;

/// Engine options this codec reads; anything else is ignored.
const KNOWN_OPTIONS: [(&str, &str); 3] = [
    ("decode", "max-width"),
    ("decode", "max-height"),
    ("jpeg", "quality"),
];

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Production [`ImageCodec`] producing [`RasterImage`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    /// Perform the process-wide engine setup (once) and return the codec.
    ///
    /// Safe to call from any number of threads; only the first call does work.
    pub fn initialize() -> Self {
        INITIALIZED.get_or_init(|| {
            tracing::debug!(
                decode = "png|jpeg",
                encode = "png|jpeg",
                "Raster engine initialized"
            );
        });
        RasterCodec
    }
}

impl ImageCodec for RasterCodec {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn decode(
        &self,
        bytes: &[u8],
        options: &DecodeOptions,
    ) -> Result<Box<dyn ImageHandle>, EngineError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| EngineError::error("decode", e.to_string()))?;

        let Some(format) = reader.format() else {
            return Err(EngineError::error("decode", "no decode delegate for this image format"));
        };

        for (format, key, _) in options.iter() {
            if !KNOWN_OPTIONS.contains(&(format, key)) {
                tracing::debug!(option = %format!("{format}:{key}"), "Engine option not recognized, ignored");
            }
        }

        let limits = decode_limits(options);
        reader.limits(limits.clone());

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| EngineError::error("decode", e.to_string()))?;
        let icc_profile = decoder.icc_profile().unwrap_or(None);
        let image = DynamicImage::from_decoder(decoder)
            .map_err(|e| EngineError::error("decode", e.to_string()))?;

        let quality = options
            .get("jpeg", "quality")
            .and_then(|q| parse_option::<u8>("jpeg:quality", q))
            .filter(|q| *q <= 100);

        tracing::trace!(
            format = format_name(format),
            width = image.width(),
            height = image.height(),
            "Decoded image"
        );

        Ok(Box::new(RasterImage {
            image,
            format,
            quality,
            colorspace: None,
            interlace: None,
            icc_profile,
            limits,
        }))
    }

    fn mime_for_format(&self, format: &str) -> Option<String> {
        output_format(format).map(|f| f.to_mime_type().to_string())
    }
}

/// A decoded raster image plus the output settings applied to it.
#[derive(Debug, Clone)]
pub struct RasterImage {
    image: DynamicImage,
    format: ImageFormat,
    quality: Option<u8>,
    colorspace: Option<Colorspace>,
    interlace: Option<Interlace>,
    icc_profile: Option<Vec<u8>>,
    /// Limits the image was decoded under; resize output is held to them too.
    limits: Limits,
}

impl RasterImage {
    fn check_output_geometry(&self, columns: u32, rows: u32) -> Result<(), EngineError> {
        let exceeds = || {
            EngineError::new(
                "resize",
                format!("geometry {columns}x{rows} exceeds limits"),
                Severity::Fatal,
            )
        };

        self.limits
            .check_dimensions(columns, rows)
            .map_err(|_| exceeds())?;

        let intermediate_rows = u64::from(rows.max(self.image.height()));
        let bytes = u64::from(columns)
            .checked_mul(intermediate_rows)
            .and_then(|px| px.checked_mul(RESAMPLE_BYTES_PER_PIXEL))
            .ok_or_else(exceeds)?;
        if self.limits.max_alloc.is_some_and(|budget| bytes > budget) {
            return Err(exceeds());
        }
        Ok(())
    }

    fn attach_profile<E: ImageEncoder>(&self, encoder: &mut E) {
        if let Some(profile) = &self.icc_profile {
            if let Err(err) = encoder.set_icc_profile(profile.clone()) {
                tracing::debug!(%err, "Encoder cannot embed colour profile, dropping it");
            }
        }
    }
}

impl ImageHandle for RasterImage {
    fn properties(&self) -> HandleProperties {
        HandleProperties {
            format: format_name(self.format).to_string(),
            width: self.image.width(),
            height: self.image.height(),
            quality: self.quality,
            colorspace: self.colorspace,
            interlace: self.interlace,
            has_metadata: self.icc_profile.is_some(),
        }
    }

    fn set_format(&mut self, format: &str) -> Result<(), EngineError> {
        let Some(target) = output_format(format) else {
            return Err(EngineError::error(
                "set_format",
                format!("no encode delegate for format '{format}'"),
            ));
        };
        self.format = target;
        Ok(())
    }

    fn set_colorspace(&mut self, colorspace: Colorspace) -> Result<(), EngineError> {
        let has_alpha = self.image.color().has_alpha();
        self.image = match colorspace {
            Colorspace::Gray if has_alpha => DynamicImage::ImageLumaA8(self.image.to_luma_alpha8()),
            Colorspace::Gray => DynamicImage::ImageLuma8(self.image.to_luma8()),
            Colorspace::Rgb | Colorspace::Srgb if has_alpha => {
                DynamicImage::ImageRgba8(self.image.to_rgba8())
            }
            Colorspace::Rgb | Colorspace::Srgb => DynamicImage::ImageRgb8(self.image.to_rgb8()),
            Colorspace::Transparent => DynamicImage::ImageRgba8(self.image.to_rgba8()),
            other => {
                return Err(EngineError::error(
                    "set_colorspace",
                    format!("colorspace '{other}' is not supported by the raster engine"),
                ));
            }
        };
        self.colorspace = Some(colorspace);
        Ok(())
    }

    fn set_interlace(&mut self, interlace: Interlace) -> Result<(), EngineError> {
        if interlace != Interlace::None {
            tracing::debug!(%interlace, "Raster engine writes non-interlaced output, interlace recorded only");
        }
        self.interlace = Some(interlace);
        Ok(())
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), EngineError> {
        if quality > 100 {
            return Err(EngineError::new(
                "set_quality",
                format!("quality {quality} out of range 0..=100"),
                Severity::Warning,
            ));
        }
        self.quality = Some(quality);
        Ok(())
    }

    fn strip(&mut self) -> Result<(), EngineError> {
        self.icc_profile = None;
        Ok(())
    }

    fn resize(
        &mut self,
        columns: u32,
        rows: u32,
        filter: FilterType,
        blur: f64,
    ) -> Result<(), EngineError> {
        if columns == 0 || rows == 0 {
            return Err(EngineError::error(
                "resize",
                format!("invalid geometry {columns}x{rows}"),
            ));
        }
        if !(0.0..=MAX_BLUR).contains(&blur) {
            return Err(EngineError::error(
                "resize",
                format!("invalid blur {blur}, expected 0..={MAX_BLUR}"),
            ));
        }
        self.check_output_geometry(columns, rows)?;

        let mut resized = self.image.resize_exact(columns, rows, resampling(filter));
        // The engine has no blur-aware kernels; >1 softens, <1 sharpens.
        if blur > 1.0 {
            resized = resized.blur((blur - 1.0) as f32);
        } else if blur < 1.0 {
            resized = resized.unsharpen((1.0 - blur) as f32, 0);
        }
        self.image = resized;
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::new();
        let result = match self.format {
            ImageFormat::Jpeg => {
                let image = jpeg_compatible(&self.image);
                let mut encoder = JpegEncoder::new_with_quality(
                    &mut out,
                    self.quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                );
                self.attach_profile(&mut encoder);
                encoder.write_image(
                    image.as_bytes(),
                    image.width(),
                    image.height(),
                    image.color().into(),
                )
            }
            _ => {
                let image = png_compatible(&self.image);
                let mut encoder = PngEncoder::new_with_quality(
                    &mut out,
                    png_compression(self.quality),
                    PngFilter::Adaptive,
                );
                self.attach_profile(&mut encoder);
                encoder.write_image(
                    image.as_bytes(),
                    image.width(),
                    image.height(),
                    image.color().into(),
                )
            }
        };
        result.map_err(|e| EngineError::error("encode", e.to_string()))?;
        Ok(out)
    }
}

/// Formats the raster engine can write.
fn output_format(name: &str) -> Option<ImageFormat> {
    match ImageFormat::from_extension(name.trim().to_ascii_lowercase())? {
        format @ (ImageFormat::Png | ImageFormat::Jpeg) => Some(format),
        _ => None,
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        other => other.extensions_str().first().copied().unwrap_or("unknown"),
    }
}

fn decode_limits(options: &DecodeOptions) -> Limits {
    let mut limits = Limits::default();
    if let Some(width) = options.get("decode", "max-width") {
        limits.max_image_width = parse_option("decode:max-width", width);
    }
    if let Some(height) = options.get("decode", "max-height") {
        limits.max_image_height = parse_option("decode:max-height", height);
    }
    limits
}

fn parse_option<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(option = name, value, "Engine option not understood, ignored");
            None
        }
    }
}

fn resampling(filter: FilterType) -> Resampling {
    match filter {
        FilterType::Point | FilterType::Box => Resampling::Nearest,
        FilterType::Triangle | FilterType::Hermite => Resampling::Triangle,
        FilterType::Catrom | FilterType::Cubic | FilterType::Mitchell | FilterType::Quadratic => {
            Resampling::CatmullRom
        }
        FilterType::Gaussian => Resampling::Gaussian,
        FilterType::Bessel
        | FilterType::Blackman
        | FilterType::Hamming
        | FilterType::Hanning
        | FilterType::Lanczos
        | FilterType::Sinc => Resampling::Lanczos3,
    }
}

fn png_compression(quality: Option<u8>) -> CompressionType {
    match quality {
        None => CompressionType::Default,
        Some(q) if q < 50 => CompressionType::Fast,
        Some(_) => CompressionType::Best,
    }
}

fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(image),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}

fn png_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ => Cow::Borrowed(image),
    }
}
