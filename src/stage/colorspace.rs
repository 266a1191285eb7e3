use crate::artifact::DeferredArtifact;
use crate::codec::Colorspace;
use crate::options::{ExpressionList, OptionResolver, RequestContext};
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

/// Converts the image colorspace; `srgb` when nothing resolves.
#[derive(Debug, Clone)]
pub struct ColorspaceStage {
    colorspace: ExpressionList,
}

impl ColorspaceStage {
    pub fn new(colorspace: ExpressionList) -> Self {
        Self { colorspace }
    }
}

impl TransformStage for ColorspaceStage {
    fn name(&self) -> &'static str {
        "colorspace"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        _effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        let colorspace = OptionResolver::new("colorspace", &self.colorspace)
            .resolve::<Colorspace>(ctx)
            .or(Colorspace::default());

        mutate_handle(self.name(), artifact, ctx, |handle| {
            handle.set_colorspace(colorspace)
        })
    }
}
