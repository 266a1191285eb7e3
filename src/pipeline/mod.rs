//! Composed pipeline for one unit of work.
//!
//! A [`Pipeline`] is built from plain configuration data: the ingest
//! accumulator at the head, then one [`StageRunner`] per configured stage in
//! order. Elements are pushed in, transformed output is drained out.
//!
//! The first fatal error is remembered; every later push reports
//! [`PipelineError::Aborted`] carrying the first error type.

mod error;
mod stream;

pub use crate::stage::HostEffects;
pub use error::PipelineError;
pub use stream::{ImageStream, StreamError};

use std::sync::Arc;

use crate::artifact::RequestScope;
use crate::codec::ImageCodec;
use crate::ingest::{DecodeOption, IngestAccumulator, DEFAULT_MAX_SIZE_BYTES};
use crate::options::RequestContext;
use crate::sequence::SequenceElement;
use crate::stage::{StageRunner, StageSpec};

/// Everything needed to build a pipeline, as plain data.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_size_bytes: u64,
    pub decode_options: Vec<DecodeOption>,
    /// Stages in execution order.
    pub stages: Vec<StageSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            decode_options: Vec::new(),
            stages: Vec::new(),
        }
    }
}

pub struct Pipeline {
    ctx: RequestContext,
    scope: RequestScope,
    ingest: IngestAccumulator,
    runners: Vec<StageRunner>,
    effects: HostEffects,
    output: Vec<SequenceElement>,
    failure: Option<&'static str>,
    announced: bool,
}

impl Pipeline {
    /// Build a pipeline with its own scope, keyed by the request id.
    pub fn new(config: &PipelineConfig, codec: Arc<dyn ImageCodec>, ctx: RequestContext) -> Self {
        let scope = RequestScope::new(ctx.request_id.clone());
        Self::with_scope(config, codec, ctx, scope)
    }

    /// Build a pipeline whose artifacts are tied to the host's `scope`.
    pub fn with_scope(
        config: &PipelineConfig,
        codec: Arc<dyn ImageCodec>,
        ctx: RequestContext,
        scope: RequestScope,
    ) -> Self {
        let runners = config
            .stages
            .iter()
            .map(|spec| StageRunner::new(spec.build(&codec)))
            .collect();
        let ingest = IngestAccumulator::new(codec, config.max_size_bytes)
            .with_options(config.decode_options.clone())
            .with_scope(scope.clone());

        Self {
            ctx,
            scope,
            ingest,
            runners,
            effects: HostEffects::default(),
            output: Vec::new(),
            failure: None,
            announced: false,
        }
    }

    /// Push one element through the pipeline.
    pub fn push(&mut self, element: SequenceElement) -> Result<(), PipelineError> {
        if let Some(cause) = self.failure {
            return Err(PipelineError::Aborted { cause });
        }
        if !self.announced {
            self.announced = true;
            tracing::debug!(
                request_id = %self.ctx.request_id,
                uri = %self.ctx.uri,
                stages = self.runners.len(),
                "Image filter enabled"
            );
        }

        let result = self.advance(element);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.abort(err);
            }
        }
        result
    }

    /// Push a batch in order. An empty batch is a no-op.
    pub fn push_all(
        &mut self,
        elements: impl IntoIterator<Item = SequenceElement>,
    ) -> Result<(), PipelineError> {
        for element in elements {
            self.push(element)?;
        }
        Ok(())
    }

    /// Take all output produced so far.
    pub fn drain(&mut self) -> Vec<SequenceElement> {
        std::mem::take(&mut self.output)
    }

    /// Content type requested by the stages, if any changed it.
    pub fn content_type(&self) -> Option<&str> {
        self.effects.content_type()
    }

    /// Whether the end marker has been processed (or the pipeline aborted).
    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished()
    }

    /// Error type of the first fatal failure, if one occurred.
    pub fn failure(&self) -> Option<&'static str> {
        self.failure
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    fn advance(&mut self, element: SequenceElement) -> Result<(), PipelineError> {
        let Some(elements) = self.ingest.push(element, &self.ctx)? else {
            return Ok(());
        };

        for runner in &mut self.runners {
            runner.process(&elements, &self.ctx, &mut self.effects)?;
        }
        self.output.extend(elements);
        Ok(())
    }

    fn abort(&mut self, err: &PipelineError) {
        tracing::error!(
            request_id = %self.ctx.request_id,
            uri = %self.ctx.uri,
            error_type = err.error_type(),
            %err,
            "Pipeline aborted"
        );
        self.failure = Some(err.error_type());
        // No partial output after a fatal error.
        self.output.clear();
        self.scope.teardown();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("request_id", &self.ctx.request_id)
            .field("ingest", &self.ingest)
            .field("runners", &self.runners)
            .field("pending_output", &self.output.len())
            .field("failure", &self.failure)
            .finish()
    }
}
