//! Shared test utilities and a recording fake engine.

#![allow(dead_code, unused_imports)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgstream::codec::{
    Colorspace, DecodeOptions, EngineError, FilterType, HandleProperties, ImageCodec, ImageHandle,
    Interlace,
};
use imgstream::options::{Expression, ExpressionList, Template};
use parking_lot::Mutex;

/// Encode a solid `width`x`height` PNG.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 60, 30])))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode fixture png");
    Bytes::from(out)
}

/// Parse expression sources for a knob.
pub fn exprs(sources: &[&str]) -> ExpressionList {
    sources
        .iter()
        .map(|s| Arc::new(Template::parse(s).expect("valid expression")) as Arc<dyn Expression>)
        .collect()
}

/// Fake engine that records every buffer it is asked to decode.
///
/// Decoding any input that starts with `b"bad"` fails. Handles report a
/// `width`x`height` png and encode to a readable summary of their state.
#[derive(Clone)]
pub struct RecordingCodec {
    pub decoded: Arc<Mutex<Vec<Vec<u8>>>>,
    pub options: Arc<Mutex<Vec<DecodeOptions>>>,
    pub encodes: Arc<AtomicUsize>,
    width: u32,
    height: u32,
}

impl RecordingCodec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            decoded: Arc::new(Mutex::new(Vec::new())),
            options: Arc::new(Mutex::new(Vec::new())),
            encodes: Arc::new(AtomicUsize::new(0)),
            width,
            height,
        }
    }

    pub fn encode_count(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }
}

impl ImageCodec for RecordingCodec {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn decode(
        &self,
        bytes: &[u8],
        options: &DecodeOptions,
    ) -> Result<Box<dyn ImageHandle>, EngineError> {
        self.decoded.lock().push(bytes.to_vec());
        self.options.lock().push(options.clone());
        if bytes.starts_with(b"bad") {
            return Err(EngineError::error("decode", "improper image header"));
        }
        Ok(Box::new(FakeHandle {
            props: HandleProperties {
                format: "png".to_string(),
                width: self.width,
                height: self.height,
                quality: None,
                colorspace: None,
                interlace: None,
                has_metadata: true,
            },
            encodes: Arc::clone(&self.encodes),
        }))
    }

    fn mime_for_format(&self, format: &str) -> Option<String> {
        match format {
            "png" => Some("image/png".to_string()),
            "jpeg" => Some("image/jpeg".to_string()),
            "webp" => Some("image/webp".to_string()),
            _ => None,
        }
    }
}

pub struct FakeHandle {
    props: HandleProperties,
    encodes: Arc<AtomicUsize>,
}

impl ImageHandle for FakeHandle {
    fn properties(&self) -> HandleProperties {
        self.props.clone()
    }

    fn set_format(&mut self, format: &str) -> Result<(), EngineError> {
        self.props.format = format.to_string();
        Ok(())
    }

    fn set_colorspace(&mut self, colorspace: Colorspace) -> Result<(), EngineError> {
        self.props.colorspace = Some(colorspace);
        Ok(())
    }

    fn set_interlace(&mut self, interlace: Interlace) -> Result<(), EngineError> {
        self.props.interlace = Some(interlace);
        Ok(())
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), EngineError> {
        self.props.quality = Some(quality);
        Ok(())
    }

    fn strip(&mut self) -> Result<(), EngineError> {
        self.props.has_metadata = false;
        Ok(())
    }

    fn resize(
        &mut self,
        columns: u32,
        rows: u32,
        _filter: FilterType,
        _blur: f64,
    ) -> Result<(), EngineError> {
        if columns == 0 || rows == 0 {
            return Err(EngineError::error("resize", "invalid geometry"));
        }
        self.props.width = columns;
        self.props.height = rows;
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, EngineError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        let p = &self.props;
        Ok(format!("{}:{}x{}:q={:?}", p.format, p.width, p.height, p.quality).into_bytes())
    }
}
