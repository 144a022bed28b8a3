//! Resilient request execution.
//!
//! Every point-to-point call goes through a stack of [`Transport`] layers
//! wrapped around the HTTP transport. The order is fixed, outermost first:
//!
//! ```text
//! DeadlineTransport -> TraceTransport -> RetryTransport -> HttpTransport
//! ```
//!
//! Layers never buffer or drop responses; they only decide how long a call
//! may take, what headers travel with it and whether it is attempted again.

mod deadline;
mod retry;
mod trace;

pub use deadline::DeadlineTransport;
pub use retry::{backoff_delay, parse_retry_after, RetryTransport};
pub use trace::TraceTransport;

use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Header carrying a caller-supplied idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Per-call execution flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Skip the default-timeout policy. Long-lived streaming calls set this
    /// so that only the caller's context bounds their lifetime.
    pub no_default_timeout: bool,
}

impl ExecuteOptions {
    pub fn streaming() -> Self {
        Self {
            no_default_timeout: true,
        }
    }
}

/// Executes one HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: Request,
        options: ExecuteOptions,
    ) -> Result<Response>;
}

/// Base transport backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: Request,
        _options: ExecuteOptions,
    ) -> Result<Response> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        debug!("{} {}", request.method(), request.url());
        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            result = self.client.execute(request) => result.map_err(ClientError::from),
        }
    }
}

/// Wrap `base` in the configured layers
pub fn layered(base: Arc<dyn Transport>, config: &ClientConfig) -> Arc<dyn Transport> {
    let retry: Arc<dyn Transport> = Arc::new(RetryTransport::new(base, config.retry.clone()));
    let traced: Arc<dyn Transport> = if config.tracing.disable {
        retry
    } else {
        Arc::new(TraceTransport::new(retry, config.tracing.clone()))
    };
    Arc::new(DeadlineTransport::new(traced, config.timeout))
}
