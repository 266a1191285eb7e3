use crate::artifact::DeferredArtifact;
use crate::options::{ExpressionList, OptionResolver, OptionValue, RequestContext};
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

const MAX_QUALITY: u32 = 100;

/// Sets the compression quality (0..=100). Unresolved quality leaves the
/// handle unchanged.
#[derive(Debug, Clone)]
pub struct QualityStage {
    quality: ExpressionList,
}

impl QualityStage {
    pub fn new(quality: ExpressionList) -> Self {
        Self { quality }
    }
}

fn parse_quality(raw: &str) -> Result<u8, String> {
    let value = u32::parse_value(raw)?;
    if value > MAX_QUALITY {
        return Err(format!("must be between 0 and {MAX_QUALITY}"));
    }
    u8::try_from(value).map_err(|e| e.to_string())
}

impl TransformStage for QualityStage {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        _effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        let resolved = OptionResolver::new("quality", &self.quality).resolve_with(ctx, parse_quality);
        let Some(quality) = resolved.value else {
            tracing::warn!(
                request_id = %ctx.request_id,
                uri = %ctx.uri,
                skipped = resolved.issues.len(),
                "No quality could be resolved, quality not changed"
            );
            return Ok(());
        };

        mutate_handle(self.name(), artifact, ctx, |handle| handle.set_quality(quality))
    }
}
