//! Transform stages.
//!
//! Every stage has the same shape: scan the elements passing through, and for
//! each artifact resolve its parameters and mutate the shared handle. The end
//! marker deactivates the stage; later elements pass through untouched.
//!
//! ```text
//! TransformStage (trait)
//!         ▲
//!    ┌────┴─────┬───────────┬──────────┬─────────┬────────┐
//! Format  Colorspace  Interlace   Quality    Strip   Resize
//!    └────┬─────┴───────────┴──────────┴─────────┴────────┘
//!         ▼
//! StageRunner (Scanning → Done)
//! ```

mod colorspace;
mod format;
mod interlace;
mod quality;
mod resize;
mod strip;

pub use colorspace::ColorspaceStage;
pub use format::FormatStage;
pub use interlace::InterlaceStage;
pub use quality::QualityStage;
pub use resize::{target_geometry, ResizeSettings, ResizeStage};
pub use strip::StripStage;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::DeferredArtifact;
use crate::codec::{EngineError, ImageCodec, ImageHandle};
use crate::options::{ExpressionList, RequestContext};
use crate::pipeline::PipelineError;
use crate::sequence::SequenceElement;

/// Side effects a stage asks the host to perform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEffects {
    content_type: Option<String>,
}

impl HostEffects {
    pub fn set_content_type(&mut self, mime: impl Into<String>) {
        self.content_type = Some(mime.into());
    }

    /// Content type the response should now carry, if a stage changed it.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// One configurable unit of mutation applied to an artifact's handle.
pub trait TransformStage: Send {
    /// Returns the name of this stage for logging.
    fn name(&self) -> &'static str;

    /// Resolve parameters for this request and mutate the artifact.
    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        effects: &mut HostEffects,
    ) -> Result<(), PipelineError>;
}

/// Run one engine primitive against the artifact's handle.
///
/// Engine rejections become `TransformFailure`, a realized artifact becomes
/// `StaleMutation`.
pub(crate) fn mutate_handle(
    stage: &'static str,
    artifact: &DeferredArtifact,
    ctx: &RequestContext,
    op: impl FnOnce(&mut dyn ImageHandle) -> Result<(), EngineError>,
) -> Result<(), PipelineError> {
    match artifact.mutate(op) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => {
            tracing::error!(
                request_id = %ctx.request_id,
                uri = %ctx.uri,
                stage,
                err = %source,
                "Image transform failed"
            );
            Err(PipelineError::TransformFailure { stage, source })
        }
        Err(err) => {
            tracing::error!(
                request_id = %ctx.request_id,
                stage,
                "Stage ran after the image was realized; check stage ordering"
            );
            Err(PipelineError::from_artifact(stage, err))
        }
    }
}

/// Lifecycle of a stage within one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Scanning,
    Done,
}

/// Drives one stage over the element sequence.
pub struct StageRunner {
    stage: Box<dyn TransformStage>,
    state: StageState,
}

impl StageRunner {
    pub fn new(stage: Box<dyn TransformStage>) -> Self {
        Self {
            stage,
            state: StageState::Scanning,
        }
    }

    pub fn name(&self) -> &'static str {
        self.stage.name()
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Scan `elements`, applying the stage to every artifact before `End`.
    pub fn process(
        &mut self,
        elements: &[SequenceElement],
        ctx: &RequestContext,
        effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        if self.state == StageState::Done {
            return Ok(());
        }

        for element in elements {
            match element {
                SequenceElement::End => {
                    tracing::trace!(stage = self.stage.name(), "Stage done");
                    self.state = StageState::Done;
                    break;
                }
                SequenceElement::Artifact(artifact) => {
                    self.stage.apply(artifact, ctx, effects)?;
                }
                SequenceElement::Data(_) | SequenceElement::Flush | SequenceElement::Metadata(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRunner")
            .field("stage", &self.stage.name())
            .field("state", &self.state)
            .finish()
    }
}

/// Stage names as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Format,
    Colorspace,
    Interlace,
    Quality,
    Strip,
    Resize,
}

/// A stage's configuration as plain data.
#[derive(Debug, Clone)]
pub enum StageSpec {
    Format(ExpressionList),
    Colorspace(ExpressionList),
    Interlace(ExpressionList),
    Quality(ExpressionList),
    Strip,
    Resize(ResizeSettings),
}

impl StageSpec {
    pub fn kind(&self) -> StageKind {
        match self {
            StageSpec::Format(_) => StageKind::Format,
            StageSpec::Colorspace(_) => StageKind::Colorspace,
            StageSpec::Interlace(_) => StageKind::Interlace,
            StageSpec::Quality(_) => StageKind::Quality,
            StageSpec::Strip => StageKind::Strip,
            StageSpec::Resize(_) => StageKind::Resize,
        }
    }

    pub fn build(&self, codec: &Arc<dyn ImageCodec>) -> Box<dyn TransformStage> {
        match self {
            StageSpec::Format(format) => {
                Box::new(FormatStage::new(format.clone(), Arc::clone(codec)))
            }
            StageSpec::Colorspace(colorspace) => Box::new(ColorspaceStage::new(colorspace.clone())),
            StageSpec::Interlace(interlace) => Box::new(InterlaceStage::new(interlace.clone())),
            StageSpec::Quality(quality) => Box::new(QualityStage::new(quality.clone())),
            StageSpec::Strip => Box::new(StripStage),
            StageSpec::Resize(settings) => Box::new(ResizeStage::new(settings.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeOptions, RasterCodec};
    use crate::options::{Expression, Template};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn artifact() -> DeferredArtifact {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        DeferredArtifact::wrap(RasterCodec.decode(&png, &DecodeOptions::new()).unwrap())
    }

    fn list(items: &[&str]) -> ExpressionList {
        items
            .iter()
            .map(|s| Arc::new(Template::parse(s).unwrap()) as Arc<dyn Expression>)
            .collect()
    }

    #[test]
    fn runner_applies_before_end_and_deactivates() {
        let mut runner = StageRunner::new(Box::new(QualityStage::new(list(&["40"]))));
        let ctx = RequestContext::new("/");
        let mut effects = HostEffects::default();
        let first = artifact();
        let late = artifact();

        let batch = vec![
            SequenceElement::Artifact(first.clone()),
            SequenceElement::Flush,
            SequenceElement::End,
            SequenceElement::Artifact(late.clone()),
        ];
        runner.process(&batch, &ctx, &mut effects).unwrap();

        assert_eq!(runner.state(), StageState::Done);
        assert_eq!(first.properties().unwrap().quality, Some(40));
        assert_eq!(late.properties().unwrap().quality, None);
    }

    #[test]
    fn done_runner_passes_everything_through() {
        let mut runner = StageRunner::new(Box::new(StripStage));
        let ctx = RequestContext::new("/");
        let mut effects = HostEffects::default();
        runner.process(&[SequenceElement::End], &ctx, &mut effects).unwrap();

        let realized = artifact();
        realized.read().unwrap();
        // Would be a stale mutation if the runner were still scanning.
        runner
            .process(&[SequenceElement::Artifact(realized)], &ctx, &mut effects)
            .unwrap();
    }

    #[test]
    fn spec_builds_matching_stage() {
        let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec);
        let specs = [
            StageSpec::Format(list(&["png"])),
            StageSpec::Colorspace(ExpressionList::new()),
            StageSpec::Interlace(ExpressionList::new()),
            StageSpec::Quality(ExpressionList::new()),
            StageSpec::Strip,
            StageSpec::Resize(ResizeSettings::default()),
        ];
        let names: Vec<_> = specs.iter().map(|s| s.build(&codec).name()).collect();
        assert_eq!(
            names,
            vec!["format", "colorspace", "interlace", "quality", "strip", "resize"]
        );
        assert_eq!(specs[5].kind(), StageKind::Resize);
    }

    #[test]
    fn engine_rejection_is_transform_failure() {
        let ctx = RequestContext::new("/");
        let err = mutate_handle("resize", &artifact(), &ctx, |h| {
            h.resize(0, 0, crate::codec::FilterType::Cubic, 1.0)
        })
        .unwrap_err();
        assert_eq!(err.error_type(), "transform_failure");
    }
}
