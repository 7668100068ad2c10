use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{Body, Client, Request};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::error::{RequestError, RequestErrorKind};
use crate::outcome::Outcome;
use crate::run::{DeadlineBound, RunContext};

use super::body::{TracedBody, spawn_body_producer};
use super::template::{BodySource, RequestTemplate};
use super::trace::{ACTIVE_TRACE, Mark, RequestTrace};

/// Performs one exchange and reports it. Failures land in the outcome's error.
///
/// The per-request scope is a child of the run token and is canceled on every
/// return path, which also stops a streaming body producer.
pub(crate) async fn execute(run: &RunContext, client: &Client, template: &RequestTemplate) -> Outcome {
    let origin = Instant::now();
    let trace = Arc::new(RequestTrace::new(origin));
    let scope = run.request_scope();
    let _release = scope.clone().drop_guard();

    let body = prepare_body(template.body(), &trace, &scope);
    let request = template.build_request(body);
    let exchanging = ACTIVE_TRACE.scope(Arc::clone(&trace), exchange(client, request, &trace));

    let result = match run.request_deadline(origin, template.timeout()) {
        Some((deadline, bound)) => tokio::select! {
            () = scope.cancelled() => Err(run.cancellation_error()),
            timed = timeout_at(deadline, exchanging) => match timed {
                Ok(result) => result,
                Err(_elapsed) => Err(match bound {
                    DeadlineBound::Request => RequestError::request_timeout(template.timeout()),
                    DeadlineBound::Run => RequestError::run_deadline(),
                }),
            },
        },
        None => tokio::select! {
            () = scope.cancelled() => Err(run.cancellation_error()),
            result = exchanging => result,
        },
    };

    let elapsed = origin.elapsed();
    let timings = trace.phases(elapsed);
    match result {
        Ok((status, content_length)) => Outcome::success(status, elapsed, timings, content_length),
        Err(err) => {
            debug!("Request failed: {}", err);
            Outcome::failure(err, elapsed, timings)
        }
    }
}

fn prepare_body(
    source: &BodySource,
    trace: &Arc<RequestTrace>,
    scope: &tokio_util::sync::CancellationToken,
) -> Option<Body> {
    match source {
        BodySource::Empty => None,
        BodySource::Fixed(bytes) if bytes.is_empty() => None,
        BodySource::Fixed(bytes) => Some(Body::wrap(TracedBody::fixed(
            bytes.clone(),
            Arc::clone(trace),
        ))),
        BodySource::Generator(generator) => {
            let (pipe, _producer) = spawn_body_producer(Arc::clone(generator), scope.clone());
            Some(Body::wrap(TracedBody::piped(pipe, Arc::clone(trace))))
        }
    }
}

async fn exchange(
    client: &Client,
    request: Request,
    trace: &RequestTrace,
) -> Result<(u16, u64), RequestError> {
    trace.mark(Mark::GetConn);
    let response = client
        .execute(request)
        .await
        .map_err(|err| classify_failure(&err, trace))?;
    trace.mark(Mark::FirstByte);
    let status = response.status().as_u16();
    let content_length = drain_response_body(response)
        .await
        .map_err(|err| classify_failure(&err, trace))?;
    Ok((status, content_length))
}

fn classify_failure(err: &reqwest::Error, trace: &RequestTrace) -> RequestError {
    match trace.body_failure() {
        Some(body_err) => RequestError::new(RequestErrorKind::BodyProduction, body_err.to_string()),
        None => RequestError::from_source(err),
    }
}

/// Reads the body to the end so the connection can return to the pool.
async fn drain_response_body(response: reqwest::Response) -> Result<u64, reqwest::Error> {
    let mut stream = response.bytes_stream();
    let mut total_bytes: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        total_bytes = total_bytes.saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
    }
    Ok(total_bytes)
}
