use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use thiserror::Error;

use super::{Pipeline, PipelineError};
use crate::sequence::SequenceElement;

/// Response body adapter: feeds upstream chunks through a [`Pipeline`] and
/// yields the transformed bytes.
///
/// Nothing is yielded until upstream ends, since the image has to be fully
/// buffered before it can be decoded. The pipeline's scope is torn down when
/// the stream is dropped, done or not.
pub struct ImageStream<S> {
    inner: S,
    pipeline: Pipeline,
    ready: VecDeque<Bytes>,
    done: bool,
}

impl<S> ImageStream<S> {
    pub fn new(inner: S, pipeline: Pipeline) -> Self {
        Self {
            inner,
            pipeline,
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Content type to serve. Only final once the stream has ended.
    pub fn content_type(&self) -> Option<&str> {
        self.pipeline.content_type()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn collect_output(&mut self) -> Result<(), PipelineError> {
        for element in self.pipeline.drain() {
            match element {
                SequenceElement::Data(bytes) => self.ready.push_back(bytes),
                SequenceElement::Artifact(artifact) => {
                    let bytes = artifact
                        .read()
                        .map_err(|err| PipelineError::from_artifact("stream", err))?;
                    tracing::trace!(
                        request_id = %self.pipeline.context().request_id,
                        bytes = bytes.len(),
                        "Image realized for response body"
                    );
                    self.ready.push_back(bytes);
                }
                // Markers have no body representation.
                SequenceElement::Flush | SequenceElement::Metadata(_) | SequenceElement::End => {}
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: StreamError) -> Poll<Option<Result<Bytes, StreamError>>> {
        self.done = true;
        self.ready.clear();
        self.pipeline.scope().teardown();
        Poll::Ready(Some(Err(err)))
    }
}

impl<S, E> Stream for ImageStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(bytes) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let Err(err) = this.pipeline.push(SequenceElement::Data(bytes)) {
                        return this.fail(StreamError::Pipeline(err));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    tracing::warn!(
                        request_id = %this.pipeline.context().request_id,
                        %err,
                        "Upstream body failed"
                    );
                    return this.fail(StreamError::Upstream(Box::new(err)));
                }
                Poll::Ready(None) => {
                    if let Err(err) = this.pipeline.push(SequenceElement::End) {
                        return this.fail(StreamError::Pipeline(err));
                    }
                    if let Err(err) = this.collect_output() {
                        return this.fail(StreamError::Pipeline(err));
                    }
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> Drop for ImageStream<S> {
    fn drop(&mut self) {
        self.pipeline.scope().teardown();
    }
}

/// Errors surfaced by [`ImageStream`].
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream error: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ImageCodec, RasterCodec};
    use crate::options::{Expression, RequestContext, Template};
    use crate::pipeline::PipelineConfig;
    use crate::stage::StageSpec;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::{self, Cursor};
    use std::sync::Arc;

    struct Chunks(VecDeque<Result<Bytes, io::Error>>);

    impl Stream for Chunks {
        type Item = Result<Bytes, io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.0.pop_front())
        }
    }

    fn png() -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([1, 100, 200])))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn stream(chunks: Vec<Result<Bytes, io::Error>>, config: PipelineConfig) -> ImageStream<Chunks> {
        let pipeline = Pipeline::new(&config, Arc::new(RasterCodec), RequestContext::new("/i"));
        ImageStream::new(Chunks(chunks.into()), pipeline)
    }

    async fn next<S: Stream + Unpin>(s: &mut S) -> Option<S::Item> {
        std::future::poll_fn(|cx| Pin::new(&mut *s).poll_next(cx)).await
    }

    #[tokio::test]
    async fn yields_transformed_image_once_upstream_ends() {
        let source = png();
        let (a, b) = source.split_at(source.len() / 2);
        let config = PipelineConfig {
            stages: vec![StageSpec::Format(vec![
                Arc::new(Template::literal("jpeg")) as Arc<dyn Expression>
            ])],
            ..PipelineConfig::default()
        };
        let mut s = stream(
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))],
            config,
        );

        let body = next(&mut s).await.unwrap().unwrap();
        assert!(next(&mut s).await.is_none());
        assert_eq!(s.content_type(), Some("image/jpeg"));

        let decoded = RasterCodec
            .decode(&body, &crate::codec::DecodeOptions::new())
            .unwrap();
        assert_eq!(decoded.properties().format, "jpeg");
    }

    #[tokio::test]
    async fn upstream_error_is_reported_and_ends_stream() {
        let mut s = stream(
            vec![Err(io::Error::other("reset"))],
            PipelineConfig::default(),
        );
        let err = next(&mut s).await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Upstream(_)));
        assert!(next(&mut s).await.is_none());
        assert!(s.pipeline().scope().is_torn_down());
    }

    #[tokio::test]
    async fn oversized_body_fails_with_too_large() {
        let config = PipelineConfig {
            max_size_bytes: 4,
            ..PipelineConfig::default()
        };
        let mut s = stream(vec![Ok(Bytes::from_static(b"12345"))], config);
        match next(&mut s).await {
            Some(Err(StreamError::Pipeline(PipelineError::TooLarge { limit: 4, seen: 5 }))) => {}
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_yields_nothing() {
        let mut s = stream(Vec::new(), PipelineConfig::default());
        assert!(next(&mut s).await.is_none());
    }
}
