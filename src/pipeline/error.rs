//! Abort signals surfaced to the host.

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::codec::EngineError;

/// Errors that stop a pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Buffered input exceeded the configured cap
    #[error("Response is too large (>{limit} bytes), aborting request")]
    TooLarge { limit: u64, seen: u64 },

    /// Buffered bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    DecodeFailure(#[source] EngineError),

    /// An engine primitive rejected a stage's parameters
    #[error("Stage '{stage}' failed: {source}")]
    TransformFailure {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    /// Serializing an artifact for a reader failed
    #[error("Failed to serialize image: {0}")]
    EncodeFailure(#[source] EngineError),

    /// A stage ran after its artifact was realized (stage ordering defect)
    #[error("Stage '{stage}' tried to mutate an already realized image")]
    StaleMutation { stage: &'static str },

    /// An element arrived after the end marker
    #[error("Element received after end of stream")]
    AfterEnd,

    /// The pipeline already failed; carries the first failure's type
    #[error("Pipeline aborted earlier: {cause}")]
    Aborted { cause: &'static str },
}

impl PipelineError {
    pub(crate) fn from_artifact(stage: &'static str, err: ArtifactError) -> Self {
        match err {
            ArtifactError::StaleMutation => PipelineError::StaleMutation { stage },
            ArtifactError::Encode(source) => PipelineError::EncodeFailure(source),
        }
    }

    /// Get error type string for the host
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::TooLarge { .. } => "too_large",
            PipelineError::DecodeFailure(_) => "decode_failure",
            PipelineError::TransformFailure { .. } => "transform_failure",
            PipelineError::EncodeFailure(_) => "encode_failure",
            PipelineError::StaleMutation { .. } => "stale_mutation",
            PipelineError::AfterEnd => "after_end",
            PipelineError::Aborted { .. } => "aborted",
        }
    }

    /// Runtime failures of the unit of work, as opposed to contract violations.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::StaleMutation { .. } | PipelineError::AfterEnd
        )
    }
}
