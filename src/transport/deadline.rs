use super::{ExecuteOptions, Transport};
use crate::context::CallContext;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;
use std::time::Duration;

/// Attaches the default timeout to calls that have no deadline of their own.
///
/// Skipped when the timeout is zero, when the context already carries a
/// deadline, or when the call opts out through [`ExecuteOptions`].
pub struct DeadlineTransport {
    inner: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl DeadlineTransport {
    pub fn new(inner: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            inner,
            default_timeout,
        }
    }

    fn applies(&self, ctx: &CallContext, options: ExecuteOptions) -> bool {
        !self.default_timeout.is_zero()
            && !options.no_default_timeout
            && ctx.deadline().is_none()
    }
}

#[async_trait]
impl Transport for DeadlineTransport {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: Request,
        options: ExecuteOptions,
    ) -> Result<Response> {
        if self.applies(ctx, options) {
            let bounded = ctx.with_timeout(self.default_timeout);
            self.inner.execute(&bounded, request, options).await
        } else {
            self.inner.execute(ctx, request, options).await
        }
    }
}
