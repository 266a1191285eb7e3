//! Elements flowing through the pipeline.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::artifact::DeferredArtifact;

/// One element of the processing sequence.
///
/// Order is significant. Cloning shares the underlying storage: a cloned
/// `Data` shares its buffer, a cloned `Artifact` is another view of the same
/// artifact.
#[derive(Debug, Clone)]
pub enum SequenceElement {
    Data(Bytes),
    Flush,
    Metadata(Metadata),
    End,
    Artifact(DeferredArtifact),
}

impl SequenceElement {
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        SequenceElement::Data(bytes.into())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, SequenceElement::End)
    }


    pub fn as_artifact(&self) -> Option<&DeferredArtifact> {
        match self {
            SequenceElement::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    /// Short tag used in traces.
    pub fn kind(&self) -> &'static str {
        match self {
            SequenceElement::Data(_) => "data",
            SequenceElement::Flush => "flush",
            SequenceElement::Metadata(_) => "metadata",
            SequenceElement::End => "end",
            SequenceElement::Artifact(_) => "artifact",
        }
    }
}

/// Opaque host metadata carried by a metadata marker.
///
/// The pipeline only preserves and reorders it; hosts recover their own type
/// with [`Metadata::downcast_ref`].
#[derive(Clone)]
pub struct Metadata(Arc<dyn Any + Send + Sync>);

impl Metadata {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Metadata(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Metadata(..)")
    }
}
