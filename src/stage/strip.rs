use crate::artifact::DeferredArtifact;
use crate::options::RequestContext;
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

/// Removes auxiliary metadata. Takes no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripStage;

impl TransformStage for StripStage {
    fn name(&self) -> &'static str {
        "strip"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        _effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        mutate_handle(self.name(), artifact, ctx, |handle| handle.strip())
    }
}
