use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BodyError, ValidationError};

use super::trace::{Mark, RequestTrace};

/// Chunks buffered between a body producer and the connection writing them.
const BODY_PIPE_DEPTH: usize = 8;

/// Produces a streaming request body one chunk at a time.
///
/// `index` counts the chunks already produced for the current request.
/// Returning `Ok(None)` ends the body.
#[async_trait]
pub trait BodyGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the next chunk cannot be produced; the request
    /// fails with a body production error.
    async fn next_chunk(&self, index: u64) -> Result<Option<Bytes>, BodyError>;
}

/// Repeats a list of chunks, pausing between writes.
#[derive(Debug, Clone)]
pub struct ChunkCycle {
    chunks: Vec<Bytes>,
    pause: Duration,
    rounds: Option<u64>,
}

impl ChunkCycle {
    /// # Errors
    ///
    /// Returns an error when `chunks` is empty.
    pub fn new(chunks: Vec<Bytes>) -> Result<Self, ValidationError> {
        if chunks.is_empty() {
            return Err(ValidationError::EmptyChunkCycle);
        }
        Ok(Self {
            chunks,
            pause: Duration::ZERO,
            rounds: None,
        })
    }

    #[must_use]
    pub const fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Stops after the chunk list was sent `rounds` times. Unbounded otherwise.
    #[must_use]
    pub const fn with_rounds(mut self, rounds: u64) -> Self {
        self.rounds = Some(rounds);
        self
    }

    fn chunk_count(&self) -> u64 {
        u64::try_from(self.chunks.len()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl BodyGenerator for ChunkCycle {
    async fn next_chunk(&self, index: u64) -> Result<Option<Bytes>, BodyError> {
        let count = self.chunk_count();
        if let Some(rounds) = self.rounds
            && index >= rounds.saturating_mul(count)
        {
            return Ok(None);
        }
        if index > 0 && !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
        let position = index
            .checked_rem(count)
            .and_then(|position| usize::try_from(position).ok())
            .unwrap_or(0);
        Ok(self.chunks.get(position).cloned())
    }
}

pub(crate) type BodyPipe = mpsc::Receiver<Result<Bytes, BodyError>>;

/// Starts the producer task feeding `generator` into a bounded pipe.
///
/// The task owns the write end and ends when the body is complete, when the
/// generator fails, when the reader drops the pipe, or when `cancel` fires.
pub(crate) fn spawn_body_producer(
    generator: Arc<dyn BodyGenerator>,
    cancel: CancellationToken,
) -> (BodyPipe, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(BODY_PIPE_DEPTH);
    let handle = tokio::spawn(async move {
        let mut index: u64 = 0;
        loop {
            let produced = tokio::select! {
                () = cancel.cancelled() => break,
                () = tx.closed() => break,
                produced = generator.next_chunk(index) => produced,
            };
            let (item, last) = match produced {
                Ok(Some(chunk)) => (Ok(chunk), false),
                Ok(None) => break,
                Err(err) => (Err(err), true),
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                sent = tx.send(item) => {
                    if sent.is_err() || last {
                        break;
                    }
                }
            }
            index = index.saturating_add(1);
        }
    });
    (rx, handle)
}

enum Frames {
    Once(Option<Bytes>),
    Piped(BodyPipe),
}

/// Request body that marks write completion on the request's trace.
pub(crate) struct TracedBody {
    frames: Frames,
    trace: Arc<RequestTrace>,
}

impl TracedBody {
    pub(crate) const fn fixed(bytes: Bytes, trace: Arc<RequestTrace>) -> Self {
        Self {
            frames: Frames::Once(Some(bytes)),
            trace,
        }
    }

    pub(crate) const fn piped(pipe: BodyPipe, trace: Arc<RequestTrace>) -> Self {
        Self {
            frames: Frames::Piped(pipe),
            trace,
        }
    }
}

impl fmt::Debug for TracedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.frames {
            Frames::Once(_) => "fixed",
            Frames::Piped(_) => "piped",
        };
        f.debug_struct("TracedBody").field("frames", &kind).finish()
    }
}

impl Body for TracedBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match &mut this.frames {
            Frames::Once(slot) => {
                let next = slot.take();
                if next.is_some() {
                    this.trace.mark(Mark::WroteRequest);
                }
                Poll::Ready(next.map(|bytes| Ok(Frame::data(bytes))))
            }
            Frames::Piped(pipe) => match pipe.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(Some(Err(err))) => {
                    this.trace.record_body_failure(&err);
                    Poll::Ready(Some(Err(err)))
                }
                Poll::Ready(None) => {
                    this.trace.mark(Mark::WroteRequest);
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.frames {
            Frames::Once(Some(bytes)) => {
                SizeHint::with_exact(u64::try_from(bytes.len()).unwrap_or(u64::MAX))
            }
            Frames::Once(None) => SizeHint::with_exact(0),
            Frames::Piped(_) => SizeHint::default(),
        }
    }
}
