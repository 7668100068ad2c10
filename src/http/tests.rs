use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use super::body::spawn_body_producer;
use super::rate::tick_period;
use super::client::{VersionMode, version_mode};
use super::trace::{ACTIVE_TRACE, ConnectTimingLayer, Mark, RequestTrace};
use super::*;
use crate::error::{BodyError, RequestErrorKind, ValidationError};
use crate::run::RunContext;

const STEP: Duration = Duration::from_millis(2);
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    Never,
}

async fn spawn_server(reply: Reply) -> Result<(String, JoinHandle<()>), String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| format!("bind test server failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("server addr failed: {}", err))?;
    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = [0u8; 4096];
                if stream.read(&mut buffer).await.is_err() {
                    return;
                }
                match reply {
                    Reply::Ok => {
                        drop(
                            stream
                                .write_all(
                                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                                )
                                .await,
                        );
                        drop(stream.shutdown().await);
                    }
                    Reply::Never => {
                        tokio::time::sleep(TEST_TIMEOUT).await;
                    }
                }
            });
        }
    });
    Ok((format!("http://{}/", addr), handle))
}

async fn refused_url() -> Result<String, String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| format!("bind failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("addr failed: {}", err))?;
    drop(listener);
    Ok(format!("http://{}/", addr))
}

fn open_context() -> RunContext {
    RunContext::new(CancellationToken::new(), None)
}

fn test_client() -> Result<reqwest::Client, String> {
    build_client(&TransportOptions::default(), 4, "http").map_err(|err| err.to_string())
}

#[derive(Debug)]
struct FailingGenerator;

#[async_trait]
impl BodyGenerator for FailingGenerator {
    async fn next_chunk(&self, _index: u64) -> Result<Option<Bytes>, BodyError> {
        Err(BodyError::new("source exhausted"))
    }
}

#[test]
fn phases_for_fresh_connection_with_body() -> Result<(), String> {
    let origin = Instant::now();
    let trace = RequestTrace::new(origin);
    for mark in [
        Mark::GetConn,
        Mark::DnsStart,
        Mark::DnsDone,
        Mark::Connected,
        Mark::WroteRequest,
        Mark::FirstByte,
    ] {
        std::thread::sleep(STEP);
        trace.mark(mark);
    }
    std::thread::sleep(STEP);
    let phases = trace.phases(origin.elapsed());

    if phases.dns < STEP || phases.connect < phases.dns {
        return Err(format!("Unexpected dns/connect: {:?}", phases));
    }
    if phases.write < STEP || phases.delay < STEP || phases.read < STEP {
        return Err(format!("Unexpected write/delay/read: {:?}", phases));
    }
    Ok(())
}

#[test]
fn phases_for_pooled_connection_without_body() -> Result<(), String> {
    let origin = Instant::now();
    let trace = RequestTrace::new(origin);
    trace.mark(Mark::GetConn);
    std::thread::sleep(STEP);
    trace.mark(Mark::FirstByte);
    std::thread::sleep(STEP);
    let phases = trace.phases(origin.elapsed());

    if phases.dns != Duration::ZERO || phases.connect != Duration::ZERO {
        return Err(format!("Pooled connection reported setup: {:?}", phases));
    }
    if phases.write != Duration::ZERO {
        return Err(format!("Body-less request reported write: {:?}", phases));
    }
    if phases.delay < STEP || phases.read < STEP {
        return Err(format!("Unexpected delay/read: {:?}", phases));
    }
    Ok(())
}

#[test]
fn first_mark_wins() -> Result<(), String> {
    let trace = RequestTrace::new(Instant::now());
    trace.mark(Mark::Connected);
    let first = trace.offset(Mark::Connected);
    std::thread::sleep(STEP);
    trace.mark(Mark::Connected);
    if trace.offset(Mark::Connected) != first || first.is_none() {
        return Err("Second mark moved the timestamp".to_owned());
    }
    Ok(())
}

#[test]
fn tick_period_follows_qps() -> Result<(), String> {
    if tick_period(10.0) != Some(Duration::from_millis(100)) {
        return Err(format!("Unexpected period: {:?}", tick_period(10.0)));
    }
    if tick_period(3.0) != Some(Duration::from_micros(333_333)) {
        return Err(format!("Unexpected period: {:?}", tick_period(3.0)));
    }
    if tick_period(1e9) != Some(Duration::from_micros(1)) {
        return Err(format!("Unexpected period: {:?}", tick_period(1e9)));
    }
    for disabled in [0.0, -5.0, f64::NAN, f64::INFINITY] {
        if tick_period(disabled).is_some() {
            return Err(format!("Rate {} should be unlimited", disabled));
        }
    }
    Ok(())
}

#[test]
fn rate_limiter_paces_acquires() -> Result<(), String> {
    run_async_test(async {
        let limiter = RateLimiter::new(20.0);
        let start = Instant::now();
        for _ in 0..5 {
            if !limiter.acquire().await {
                return Err("Limiter closed".to_owned());
            }
        }
        let elapsed = start.elapsed();
        if elapsed < Duration::from_millis(180) {
            return Err(format!("Five permits at 20 qps took {:?}", elapsed));
        }
        Ok(())
    })
}

#[test]
fn rate_limiter_does_not_bank_idle_ticks() -> Result<(), String> {
    run_async_test(async {
        let limiter = RateLimiter::new(20.0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let start = Instant::now();
        for _ in 0..3 {
            if !limiter.acquire().await {
                return Err("Limiter closed".to_owned());
            }
        }
        let elapsed = start.elapsed();
        if elapsed < Duration::from_millis(40) {
            return Err(format!("Idle time was banked: 3 permits in {:?}", elapsed));
        }
        Ok(())
    })
}

#[test]
fn unlimited_limiter_never_blocks() -> Result<(), String> {
    run_async_test(async {
        let limiter = RateLimiter::new(0.0);
        if !limiter.is_unlimited() {
            return Err("Zero qps should be unlimited".to_owned());
        }
        tokio::time::timeout(Duration::from_millis(50), async {
            for _ in 0..1000 {
                limiter.acquire().await;
            }
        })
        .await
        .map_err(|err| format!("Unlimited acquire blocked: {}", err))
    })
}

#[test]
fn chunk_cycle_repeats_then_ends() -> Result<(), String> {
    run_async_test(async {
        let cycle = ChunkCycle::new(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
            .map_err(|err| err.to_string())?
            .with_rounds(2);
        let mut produced = Vec::new();
        let mut index: u64 = 0;
        while let Some(chunk) = cycle
            .next_chunk(index)
            .await
            .map_err(|err| err.to_string())?
        {
            produced.push(chunk);
            index = index.saturating_add(1);
        }
        let expected = [b"a", b"b", b"a", b"b"].map(|chunk| Bytes::from_static(chunk));
        if produced != expected {
            return Err(format!("Unexpected chunks: {:?}", produced));
        }
        Ok(())
    })
}

#[test]
fn chunk_cycle_rejects_empty_list() -> Result<(), String> {
    match ChunkCycle::new(Vec::new()) {
        Err(ValidationError::EmptyChunkCycle) => Ok(()),
        other => Err(format!("Unexpected result: {:?}", other)),
    }
}

#[test]
fn body_producer_stops_on_cancel() -> Result<(), String> {
    run_async_test(async {
        let cycle = ChunkCycle::new(vec![Bytes::from_static(b"x")])
            .map_err(|err| err.to_string())?
            .with_pause(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let (mut pipe, producer) = spawn_body_producer(Arc::new(cycle), cancel.clone());
        if pipe.recv().await.is_none() {
            return Err("Producer wrote nothing".to_owned());
        }
        cancel.cancel();
        tokio::time::timeout(TEST_TIMEOUT, producer)
            .await
            .map_err(|err| format!("Producer leaked: {}", err))?
            .map_err(|err| format!("Producer join error: {}", err))?;
        Ok(())
    })
}

#[test]
fn body_producer_stops_when_reader_drops() -> Result<(), String> {
    run_async_test(async {
        let cycle = ChunkCycle::new(vec![Bytes::from_static(b"x")]).map_err(|err| err.to_string())?;
        let (pipe, producer) = spawn_body_producer(Arc::new(cycle), CancellationToken::new());
        drop(pipe);
        tokio::time::timeout(TEST_TIMEOUT, producer)
            .await
            .map_err(|err| format!("Producer leaked: {}", err))?
            .map_err(|err| format!("Producer join error: {}", err))?;
        Ok(())
    })
}

#[test]
fn template_keeps_repeated_headers() -> Result<(), String> {
    let template = RequestTemplate::builder("http://localhost:8080/path")
        .method("post")
        .header("X-Tag", "one")
        .header("X-Tag", "two")
        .build()
        .map_err(|err| err.to_string())?;
    if template.method() != http::Method::POST {
        return Err(format!("Unexpected method: {}", template.method()));
    }
    let values: Vec<_> = template.headers().get_all("x-tag").iter().collect();
    if values != ["one", "two"] {
        return Err(format!("Unexpected header values: {:?}", values));
    }
    Ok(())
}

#[test]
fn template_rejects_bad_input() -> Result<(), String> {
    match RequestTemplate::builder("ftp://example.com/").build() {
        Err(ValidationError::UnsupportedScheme { scheme }) if scheme == "ftp" => {}
        other => return Err(format!("Unexpected scheme result: {:?}", other)),
    }
    match RequestTemplate::builder("not a url").build() {
        Err(ValidationError::InvalidUrl { .. }) => {}
        other => return Err(format!("Unexpected url result: {:?}", other)),
    }
    match RequestTemplate::builder("http://example.com/")
        .header("Bad Name", "v")
        .build()
    {
        Err(ValidationError::InvalidHeaderName { .. }) => {}
        other => return Err(format!("Unexpected header result: {:?}", other)),
    }
    match RequestTemplate::builder("http://example.com/")
        .timeout(Duration::ZERO)
        .build()
    {
        Err(ValidationError::ZeroRequestTimeout) => {}
        other => return Err(format!("Unexpected timeout result: {:?}", other)),
    }
    let clamped = RequestTemplate::builder("http://example.com/")
        .timeout(Duration::from_secs(1_000_000))
        .build()
        .map_err(|err| err.to_string())?;
    if clamped.timeout() != MAX_REQUEST_TIMEOUT {
        return Err(format!("Timeout not clamped: {:?}", clamped.timeout()));
    }
    Ok(())
}

#[test]
fn built_requests_do_not_share_headers() -> Result<(), String> {
    let mut template = RequestTemplate::builder("http://example.com/")
        .header("X-Run", "a")
        .build()
        .map_err(|err| err.to_string())?;
    let mut request = template.build_request(None);
    template
        .headers_mut()
        .insert("x-run", http::HeaderValue::from_static("changed"));
    if request.headers().get("x-run").map(|value| value.as_bytes()) != Some(&b"a"[..]) {
        return Err("Template change leaked into a built request".to_owned());
    }
    request.headers_mut().remove("x-run");
    if template.headers().get("x-run").is_none() {
        return Err("Request change leaked into the template".to_owned());
    }
    Ok(())
}

#[test]
fn execute_reports_status_and_length() -> Result<(), String> {
    run_async_test(async {
        let (url, server) = spawn_server(Reply::Ok).await?;
        let client = test_client()?;
        let template = RequestTemplate::builder(url)
            .build()
            .map_err(|err| err.to_string())?;
        let outcome = execute(&open_context(), &client, &template).await;
        server.abort();
        if outcome.error.is_some() || outcome.status_code != Some(200) {
            return Err(format!("Unexpected outcome: {:?}", outcome));
        }
        if outcome.content_length != 2 {
            return Err(format!("Unexpected length: {}", outcome.content_length));
        }
        if outcome.timings.read > outcome.duration || outcome.timings.connect > outcome.duration {
            return Err(format!("Phases exceed total: {:?}", outcome));
        }
        Ok(())
    })
}

#[test]
fn execute_classifies_refused_connection() -> Result<(), String> {
    run_async_test(async {
        let url = refused_url().await?;
        let client = test_client()?;
        let template = RequestTemplate::builder(url)
            .build()
            .map_err(|err| err.to_string())?;
        let outcome = execute(&open_context(), &client, &template).await;
        match outcome.error.as_ref().map(|err| err.kind()) {
            Some(RequestErrorKind::Connection) => {}
            other => return Err(format!("Unexpected kind {:?}: {:?}", other, outcome)),
        }
        if outcome.status_code.is_some() {
            return Err("Failed request carried a status code".to_owned());
        }
        Ok(())
    })
}

#[test]
fn execute_times_out_on_silent_server() -> Result<(), String> {
    run_async_test(async {
        let (url, server) = spawn_server(Reply::Never).await?;
        let client = test_client()?;
        let template = RequestTemplate::builder(url)
            .timeout(Duration::from_millis(200))
            .build()
            .map_err(|err| err.to_string())?;
        let outcome = execute(&open_context(), &client, &template).await;
        server.abort();
        let Some(error) = outcome.error.as_ref() else {
            return Err(format!("Expected a timeout: {:?}", outcome));
        };
        if error.kind() != RequestErrorKind::Timeout || !error.detail().contains("request timeout") {
            return Err(format!("Unexpected error: {}", error));
        }
        if outcome.duration > Duration::from_secs(2) {
            return Err(format!("Timeout took {:?}", outcome.duration));
        }
        Ok(())
    })
}

#[test]
fn run_deadline_beats_longer_request_timeout() -> Result<(), String> {
    run_async_test(async {
        let (url, server) = spawn_server(Reply::Never).await?;
        let client = test_client()?;
        let template = RequestTemplate::builder(url)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| err.to_string())?;
        let deadline = Instant::now()
            .checked_add(Duration::from_millis(200))
            .ok_or("deadline overflow")?;
        let context = RunContext::new(CancellationToken::new(), Some(deadline));
        let outcome = execute(&context, &client, &template).await;
        server.abort();
        match outcome.error.as_ref() {
            Some(error) if error.to_string() == "timeout: run deadline exceeded" => Ok(()),
            other => Err(format!("Unexpected error: {:?}", other)),
        }
    })
}

#[test]
fn execute_reports_body_generator_failure() -> Result<(), String> {
    run_async_test(async {
        let (url, server) = spawn_server(Reply::Never).await?;
        let client = test_client()?;
        let template = RequestTemplate::builder(url)
            .method("POST")
            .body_generator(Arc::new(FailingGenerator))
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|err| err.to_string())?;
        let outcome = execute(&open_context(), &client, &template).await;
        server.abort();
        match outcome.error.as_ref().map(|err| err.kind()) {
            Some(RequestErrorKind::BodyProduction) => Ok(()),
            other => Err(format!("Unexpected kind {:?}: {:?}", other, outcome)),
        }
    })
}

#[test]
fn execute_classifies_unresolvable_host() -> Result<(), String> {
    run_async_test(async {
        let client = test_client()?;
        let template = RequestTemplate::builder("http://no-such-host.invalid/")
            .timeout(TEST_TIMEOUT)
            .build()
            .map_err(|err| err.to_string())?;
        let outcome = execute(&open_context(), &client, &template).await;
        match outcome.error.as_ref().map(|err| err.kind()) {
            Some(RequestErrorKind::Resolution) => Ok(()),
            other => Err(format!("Unexpected kind {:?}: {:?}", other, outcome)),
        }
    })
}

#[test]
fn http2_negotiates_over_tls_only() -> Result<(), String> {
    let cases = [
        (Protocol::Http1, "http", VersionMode::Http1Only),
        (Protocol::Http1, "https", VersionMode::Http1Only),
        (Protocol::Http2, "https", VersionMode::Negotiated),
        (Protocol::Http2, "http", VersionMode::PriorKnowledge),
    ];
    for (protocol, scheme, expected) in cases {
        let mode = version_mode(protocol, scheme);
        if mode != expected {
            return Err(format!("{:?} over {} gave {:?}", protocol, scheme, mode));
        }
    }
    let options = TransportOptions {
        protocol: Protocol::Http2,
        ..TransportOptions::default()
    };
    build_client(&options, 4, "https").map_err(|err| err.to_string())?;
    build_client(&options, 4, "http").map_err(|err| err.to_string())?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct InstantDial;

impl Service<()> for InstantDial {
    type Response = ();
    type Error = std::convert::Infallible;
    type Future = std::future::Ready<Result<(), std::convert::Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _target: ()) -> Self::Future {
        std::future::ready(Ok(()))
    }
}

#[test]
fn connect_mark_requires_the_requesting_task() -> Result<(), String> {
    run_async_test(async {
        let mut dial = ConnectTimingLayer.layer(InstantDial);

        let owner = Arc::new(RequestTrace::new(Instant::now()));
        drop(ACTIVE_TRACE.scope(Arc::clone(&owner), dial.call(())).await);
        if owner.offset(Mark::Connected).is_none() {
            return Err("Dial finished on the request task was not marked".to_owned());
        }

        let abandoned = Arc::new(RequestTrace::new(Instant::now()));
        let handed_off = ACTIVE_TRACE.sync_scope(Arc::clone(&abandoned), || dial.call(()));
        if tokio::spawn(handed_off).await.is_err() {
            return Err("Background dial task failed".to_owned());
        }
        if abandoned.offset(Mark::Connected).is_some() {
            return Err("Background dial marked a request that did not use it".to_owned());
        }
        Ok(())
    })
}
