//! Admission-controlled buffering of the response body.
//!
//! The accumulator swallows every `Data` element until the end marker, sets
//! flush and metadata markers aside, and enforces the size cap on every chunk.
//! At `End` it decodes the buffered bytes once and emits
//! `[Artifact, <preserved markers>..., End]`.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::artifact::{DeferredArtifact, RequestScope};
use crate::codec::{DecodeOptions, ImageCodec};
use crate::options::{Expression, RequestContext};
use crate::pipeline::PipelineError;
use crate::sequence::SequenceElement;

/// Default cap on the buffered source image.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// One `format:key` engine option whose value is evaluated per request.
#[derive(Debug, Clone)]
pub struct DecodeOption {
    pub format: String,
    pub key: String,
    pub value: Arc<dyn Expression>,
}

/// Buffering stage at the head of every pipeline.
pub struct IngestAccumulator {
    codec: Arc<dyn ImageCodec>,
    max_size: u64,
    options: Vec<DecodeOption>,
    scope: Option<RequestScope>,
    buffer: Vec<Bytes>,
    seen_bytes: u64,
    side: Vec<SequenceElement>,
    finished: bool,
}

impl IngestAccumulator {
    pub fn new(codec: Arc<dyn ImageCodec>, max_size: u64) -> Self {
        Self {
            codec,
            max_size,
            options: Vec::new(),
            scope: None,
            buffer: Vec::new(),
            seen_bytes: 0,
            side: Vec::new(),
            finished: false,
        }
    }

    pub fn with_options(mut self, options: Vec<DecodeOption>) -> Self {
        self.options = options;
        self
    }

    /// Register created artifacts with `scope` for teardown.
    pub fn with_scope(mut self, scope: RequestScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Bytes buffered so far.
    pub fn seen_bytes(&self) -> u64 {
        self.seen_bytes
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one element.
    ///
    /// Returns `Ok(None)` while buffering and `Ok(Some(elements))` once the
    /// end marker has been processed.
    pub fn push(
        &mut self,
        element: SequenceElement,
        ctx: &RequestContext,
    ) -> Result<Option<Vec<SequenceElement>>, PipelineError> {
        if self.finished {
            return Err(PipelineError::AfterEnd);
        }

        match element {
            SequenceElement::End => self.finish(ctx).map(Some),
            SequenceElement::Flush | SequenceElement::Metadata(_) => {
                // Markers never force a partial flush of the buffer.
                self.side.push(element);
                Ok(None)
            }
            SequenceElement::Data(bytes) => {
                self.admit(bytes, ctx)?;
                Ok(None)
            }
            SequenceElement::Artifact(artifact) => {
                // An upstream artifact is just more source bytes.
                let bytes = artifact
                    .read()
                    .map_err(|err| PipelineError::from_artifact("ingest", err))?;
                self.admit(bytes, ctx)?;
                Ok(None)
            }
        }
    }

    fn admit(&mut self, bytes: Bytes, ctx: &RequestContext) -> Result<(), PipelineError> {
        self.seen_bytes += bytes.len() as u64;
        if self.seen_bytes > self.max_size {
            tracing::error!(
                request_id = %ctx.request_id,
                uri = %ctx.uri,
                limit = self.max_size,
                seen = self.seen_bytes,
                "Response is too large, aborting request"
            );
            let seen = self.seen_bytes;
            self.buffer.clear();
            self.side.clear();
            self.finished = true;
            return Err(PipelineError::TooLarge {
                limit: self.max_size,
                seen,
            });
        }
        if !bytes.is_empty() {
            self.buffer.push(bytes);
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &RequestContext) -> Result<Vec<SequenceElement>, PipelineError> {
        self.finished = true;
        let mut out = Vec::with_capacity(self.side.len() + 2);

        if self.seen_bytes > 0 {
            let data = self.flatten();
            let options = self.evaluate_options(ctx);

            let handle = self.codec.decode(&data, &options).map_err(|err| {
                tracing::error!(
                    request_id = %ctx.request_id,
                    uri = %ctx.uri,
                    codec = self.codec.name(),
                    %err,
                    "Failed to decode buffered image"
                );
                PipelineError::DecodeFailure(err)
            })?;

            let artifact = match &self.scope {
                Some(scope) => DeferredArtifact::wrap_in(handle, scope),
                None => DeferredArtifact::wrap(handle),
            };
            tracing::debug!(
                request_id = %ctx.request_id,
                bytes = data.len(),
                markers = self.side.len(),
                "Buffered image decoded"
            );
            out.push(SequenceElement::Artifact(artifact));
        }

        out.append(&mut self.side);
        out.push(SequenceElement::End);
        Ok(out)
    }

    fn flatten(&mut self) -> Bytes {
        let chunks = std::mem::take(&mut self.buffer);
        if let [single] = chunks.as_slice() {
            return single.clone();
        }
        let mut flat = BytesMut::with_capacity(self.seen_bytes as usize);
        for chunk in &chunks {
            flat.extend_from_slice(chunk);
        }
        flat.freeze()
    }

    fn evaluate_options(&self, ctx: &RequestContext) -> DecodeOptions {
        let mut options = DecodeOptions::new();
        for option in &self.options {
            match option.value.evaluate(ctx) {
                Ok(value) => options.set(&option.format, &option.key, value),
                Err(err) => tracing::warn!(
                    request_id = %ctx.request_id,
                    uri = %ctx.uri,
                    option = %format!("{}:{}", option.format, option.key),
                    %err,
                    "Failure while evaluating the option value expression, option ignored"
                ),
            }
        }
        options
    }
}

impl std::fmt::Debug for IngestAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestAccumulator")
            .field("codec", &self.codec.name())
            .field("max_size", &self.max_size)
            .field("seen_bytes", &self.seen_bytes)
            .field("markers", &self.side.len())
            .field("finished", &self.finished)
            .finish()
    }
}
