use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::time::Instant;
use tower::{Layer, Service};

use crate::error::{BodyError, ResolveError};
use crate::outcome::PhaseTimings;

tokio::task_local! {
    pub(crate) static ACTIVE_TRACE: Arc<RequestTrace>;
}

/// Connection-lifecycle points captured for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    DnsStart,
    DnsDone,
    GetConn,
    Connected,
    WroteRequest,
    FirstByte,
}

/// Monotonic timestamps for one exchange, written by the hooks that observe it.
///
/// Each slot stores nanoseconds since `origin` plus one, zero meaning unset.
/// The first write wins so a retried dial cannot move a mark.
#[derive(Debug)]
pub(crate) struct RequestTrace {
    origin: Instant,
    dns_start: AtomicU64,
    dns_done: AtomicU64,
    get_conn: AtomicU64,
    connected: AtomicU64,
    wrote_request: AtomicU64,
    first_byte: AtomicU64,
    body_failure: OnceLock<BodyError>,
}

impl RequestTrace {
    pub(crate) const fn new(origin: Instant) -> Self {
        Self {
            origin,
            dns_start: AtomicU64::new(0),
            dns_done: AtomicU64::new(0),
            get_conn: AtomicU64::new(0),
            connected: AtomicU64::new(0),
            wrote_request: AtomicU64::new(0),
            first_byte: AtomicU64::new(0),
            body_failure: OnceLock::new(),
        }
    }

    const fn slot(&self, mark: Mark) -> &AtomicU64 {
        match mark {
            Mark::DnsStart => &self.dns_start,
            Mark::DnsDone => &self.dns_done,
            Mark::GetConn => &self.get_conn,
            Mark::Connected => &self.connected,
            Mark::WroteRequest => &self.wrote_request,
            Mark::FirstByte => &self.first_byte,
        }
    }

    pub(crate) fn mark(&self, mark: Mark) {
        self.mark_at(mark, Instant::now());
    }

    /// Records `mark` at `at`; instants before the origin count as the origin.
    pub(crate) fn mark_at(&self, mark: Mark, at: Instant) {
        let nanos = u64::try_from(at.saturating_duration_since(self.origin).as_nanos())
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        drop(
            self.slot(mark)
                .compare_exchange(0, nanos, Ordering::AcqRel, Ordering::Acquire),
        );
    }

    pub(crate) fn offset(&self, mark: Mark) -> Option<Duration> {
        match self.slot(mark).load(Ordering::Acquire) {
            0 => None,
            stored => Some(Duration::from_nanos(stored.saturating_sub(1))),
        }
    }

    fn span(&self, from: Mark, to: Mark) -> Duration {
        match (self.offset(from), self.offset(to)) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            (None, _) | (_, None) => Duration::ZERO,
        }
    }

    pub(crate) fn record_body_failure(&self, err: &BodyError) {
        drop(self.body_failure.set(err.clone()));
    }

    pub(crate) fn body_failure(&self) -> Option<&BodyError> {
        self.body_failure.get()
    }

    /// Derives the phase breakdown, with `end` measured from the trace origin.
    ///
    /// Connect time is only reported when a connection was dialed for this
    /// request; a pooled connection leaves it at zero. A request without a body
    /// counts as written once the connection was in hand.
    pub(crate) fn phases(&self, end: Duration) -> PhaseTimings {
        let get_conn = self.offset(Mark::GetConn);
        let connected = self.offset(Mark::Connected);
        let first_byte = self.offset(Mark::FirstByte);
        let write_start = connected.or(get_conn);
        let wrote = self
            .offset(Mark::WroteRequest)
            .or_else(|| first_byte.and(write_start));

        let gap = |from: Option<Duration>, to: Option<Duration>| match (from, to) {
            (Some(start), Some(stop)) => stop.saturating_sub(start),
            (None, _) | (_, None) => Duration::ZERO,
        };

        PhaseTimings {
            dns: self.span(Mark::DnsStart, Mark::DnsDone),
            connect: self.span(Mark::GetConn, Mark::Connected),
            write: gap(write_start, wrote),
            delay: gap(wrote, first_byte),
            read: first_byte.map_or(Duration::ZERO, |start| end.saturating_sub(start)),
        }
    }
}

fn current_trace() -> Option<Arc<RequestTrace>> {
    ACTIVE_TRACE.try_with(Arc::clone).ok()
}

/// System resolver that marks DNS start/done on the requesting call's trace.
///
/// The trace is looked up when the lookup completes. A lookup that hyper moved
/// to a background task after the request took a pooled connection finds no
/// trace there and leaves the request's marks alone.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TracedResolver;

impl Resolve for TracedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_owned();
        Box::pin(async move {
            let started = Instant::now();
            let resolved = lookup(host).await;
            if let Some(trace) = current_trace() {
                trace.mark_at(Mark::DnsStart, started);
                trace.mark(Mark::DnsDone);
            }
            let addrs = resolved?;
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn lookup(host: String) -> Result<Addrs, ResolveError> {
    let resolved = tokio::net::lookup_host((host.as_str(), 0))
        .await
        .map(Iterator::collect::<Vec<SocketAddr>>);
    let addrs = match resolved {
        Ok(addrs) => addrs,
        Err(source) => return Err(ResolveError::Lookup { host, source }),
    };
    if addrs.is_empty() {
        return Err(ResolveError::NoAddresses { host });
    }
    Ok(Box::new(addrs.into_iter()))
}

/// Connector layer marking the moment a fresh connection is ready.
///
/// Like the resolver, it finds the trace only when the dial completes on the
/// requesting task; a dial handed off to the pool in the background does not
/// mark the request that abandoned it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConnectTimingLayer;

impl<S> Layer<S> for ConnectTimingLayer {
    type Service = ConnectTiming<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectTiming { inner }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectTiming<S> {
    inner: S,
}

type ConnectFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

impl<S, R> Service<R> for ConnectTiming<S>
where
    S: Service<R>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ConnectFuture<S::Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, target: R) -> Self::Future {
        let connecting = self.inner.call(target);
        Box::pin(async move {
            let conn = connecting.await?;
            if let Some(trace) = current_trace() {
                trace.mark(Mark::Connected);
            }
            Ok(conn)
        })
    }
}
