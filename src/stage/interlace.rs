use crate::artifact::DeferredArtifact;
use crate::codec::Interlace;
use crate::options::{ExpressionList, OptionResolver, RequestContext};
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

/// Sets the interlace scheme; `plane` when nothing resolves.
#[derive(Debug, Clone)]
pub struct InterlaceStage {
    interlace: ExpressionList,
}

impl InterlaceStage {
    pub fn new(interlace: ExpressionList) -> Self {
        Self { interlace }
    }
}

impl TransformStage for InterlaceStage {
    fn name(&self) -> &'static str {
        "interlace"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        _effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        let interlace = OptionResolver::new("interlace", &self.interlace)
            .resolve::<Interlace>(ctx)
            .or(Interlace::default());

        mutate_handle(self.name(), artifact, ctx, |handle| handle.set_interlace(interlace))
    }
}
