//! Outbound HTTP with trace propagation.
//!
//! Calls to third-party services (the identity provider, its resource API)
//! carry the current span's W3C `traceparent` so provider-side logs can be
//! correlated with ours, and every call is logged with its status and latency.
//!
//! See: https://www.w3.org/TR/trace-context/

use std::time::{Duration, Instant};

use opentelemetry::trace::{SpanContext, TraceContextExt};
use reqwest::header::HeaderMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// `version-trace_id-span_id-trace_flags`, or `None` for an invalid context.
pub fn traceparent(span_context: &SpanContext) -> Option<String> {
    span_context.is_valid().then(|| {
        format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        )
    })
}

/// Inject the current span's trace context into `headers`.
///
/// Does nothing when there is no valid OpenTelemetry span context, for
/// example when the OTLP exporter is disabled.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    let Some(value) = traceparent(span_context) else {
        return;
    };
    if let Ok(value) = value.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = tracestate.parse()
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
}

/// A reqwest request that injects trace headers and logs its outcome on send.
pub struct TracedRequest {
    request: reqwest::RequestBuilder,
    method: &'static str,
    url: String,
}

impl TracedRequest {
    fn new(request: reqwest::RequestBuilder, method: &'static str, url: &str) -> Self {
        Self {
            request,
            method,
            url: url.to_string(),
        }
    }

    fn map(self, f: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder) -> Self {
        Self {
            request: f(self.request),
            ..self
        }
    }

    pub fn json<T: serde::Serialize + ?Sized>(self, json: &T) -> Self {
        self.map(|r| r.json(json))
    }

    pub fn form<T: serde::Serialize + ?Sized>(self, form: &T) -> Self {
        self.map(|r| r.form(form))
    }

    pub fn query<T: serde::Serialize + ?Sized>(self, query: &T) -> Self {
        self.map(|r| r.query(query))
    }

    pub fn bearer_auth<T: std::fmt::Display>(self, token: T) -> Self {
        self.map(|r| r.bearer_auth(token))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|r| r.timeout(timeout))
    }

    pub async fn send(self) -> Result<reqwest::Response, reqwest::Error> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let started = Instant::now();
        let result = self.request.headers(headers).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => tracing::debug!(
                method = self.method,
                url = %self.url,
                status = response.status().as_u16(),
                elapsed_ms,
                "Outbound call"
            ),
            Err(e) => tracing::warn!(
                method = self.method,
                url = %self.url,
                elapsed_ms,
                timeout = e.is_timeout(),
                error = %e,
                "Outbound call failed"
            ),
        }
        result
    }
}

pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> TracedRequest;
    fn traced_post(&self, url: &str) -> TracedRequest;
    fn traced_patch(&self, url: &str) -> TracedRequest;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.get(url), "GET", url)
    }

    fn traced_post(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.post(url), "POST", url)
    }

    fn traced_patch(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.patch(url), "PATCH", url)
    }
}
