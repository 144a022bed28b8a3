use super::{ExecuteOptions, Transport};
use crate::config::TracingConfig;
use crate::context::CallContext;
use crate::error::Result;
use async_trait::async_trait;
use opentelemetry::propagation::{Injector, TextMapPropagator};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Request, Response};
use std::sync::Arc;
use tracing::field::Empty;
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Propagates trace context on outgoing requests and, when enabled, opens a
/// span per call. Never changes the outcome of a call.
pub struct TraceTransport {
    inner: Arc<dyn Transport>,
    config: TracingConfig,
}

impl TraceTransport {
    pub fn new(inner: Arc<dyn Transport>, config: TracingConfig) -> Self {
        Self { inner, config }
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Write the span's OpenTelemetry context into `headers` using the global
/// propagator
pub fn inject_context(span: &Span, headers: &mut HeaderMap) {
    let cx = span.context();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(headers))
    });
}

fn span_name(request: &Request) -> String {
    format!("driftq.http {} {}", request.method(), request.url().path())
}

#[async_trait]
impl Transport for TraceTransport {
    async fn execute(
        &self,
        ctx: &CallContext,
        mut request: Request,
        options: ExecuteOptions,
    ) -> Result<Response> {
        if !self.config.start_spans {
            inject_context(&Span::current(), request.headers_mut());
            return self.inner.execute(ctx, request, options).await;
        }

        let span = tracing::info_span!(
            "driftq.http",
            otel.name = %span_name(&request),
            http.method = %request.method(),
            http.url = %request.url(),
            http.status_code = Empty,
            otel.status_code = Empty,
            error = Empty,
        );
        inject_context(&span, request.headers_mut());

        let result = self
            .inner
            .execute(ctx, request, options)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(response) => {
                let status = response.status();
                span.record("http.status_code", status.as_u16());
                if status.as_u16() >= 400 {
                    span.record("otel.status_code", "ERROR");
                }
            }
            Err(err) => {
                span.record("error", tracing::field::display(err));
                span.record("otel.status_code", "ERROR");
            }
        }

        result
    }
}
