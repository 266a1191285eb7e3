//! Output format conversion.

use std::sync::Arc;

use crate::artifact::DeferredArtifact;
use crate::codec::ImageCodec;
use crate::options::{ExpressionList, OptionResolver, RequestContext};
use crate::pipeline::PipelineError;

use super::{mutate_handle, HostEffects, TransformStage};

/// Sets the output format and reports the matching content type to the host.
#[derive(Clone)]
pub struct FormatStage {
    format: ExpressionList,
    codec: Arc<dyn ImageCodec>,
}

impl FormatStage {
    pub fn new(format: ExpressionList, codec: Arc<dyn ImageCodec>) -> Self {
        Self { format, codec }
    }
}

impl TransformStage for FormatStage {
    fn name(&self) -> &'static str {
        "format"
    }

    fn apply(
        &self,
        artifact: &DeferredArtifact,
        ctx: &RequestContext,
        effects: &mut HostEffects,
    ) -> Result<(), PipelineError> {
        let resolved = OptionResolver::new("format", &self.format).resolve::<String>(ctx);
        let Some(format) = resolved.value else {
            tracing::warn!(
                request_id = %ctx.request_id,
                uri = %ctx.uri,
                skipped = resolved.issues.len(),
                "No format could be resolved, format not changed"
            );
            return Ok(());
        };

        mutate_handle(self.name(), artifact, ctx, |handle| handle.set_format(&format))?;

        match self.codec.mime_for_format(&format) {
            Some(mime) => {
                tracing::debug!(request_id = %ctx.request_id, %format, %mime, "Format set");
                effects.set_content_type(mime);
            }
            None => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    %format,
                    "No content type known for format, response header unchanged"
                );
            }
        }
        Ok(())
    }
}
