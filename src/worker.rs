//! Bounded fan-out of delivered messages to a handler.
//!
//! A [`Worker`] owns one consume stream. Each message takes a semaphore
//! permit before it is spawned onto a [`TaskTracker`], so at most
//! `concurrency` handlers run at once while the dispatch loop keeps pulling.
//! A handler that returns `Ok` gets its message acked; an error nacks it with
//! a reason capped at `max_nack_reason_bytes`. Shutdown, whether from
//! cancellation, end of stream or a stream error, waits for every spawned
//! handler to finish and report its outcome.

use crate::{
    client::DriftqClient,
    context::CallContext,
    error::{ClientError, Result},
    message::DeliveredMessage,
    types::ConsumeOptions,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Cap applied to nack reasons when none is configured
pub const DEFAULT_MAX_NACK_REASON_BYTES: usize = 1024;

/// Processes one delivered message
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// `ctx` carries the message's envelope deadline when it is earlier than
    /// the worker's own
    async fn handle(&self, ctx: &CallContext, message: &DeliveredMessage) -> anyhow::Result<()>;
}

/// Handler built from an async closure, see [`step_fn`]
pub struct StepFn<F>(F);

/// Adapt `f` into a [`StepHandler`]
pub fn step_fn<F, Fut>(f: F) -> StepFn<F>
where
    F: Fn(CallContext, DeliveredMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    StepFn(f)
}

#[async_trait]
impl<F, Fut> StepHandler for StepFn<F>
where
    F: Fn(CallContext, DeliveredMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, ctx: &CallContext, message: &DeliveredMessage) -> anyhow::Result<()> {
        (self.0)(ctx.clone(), message.clone()).await
    }
}

pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;
pub type NackReasonFn =
    Arc<dyn Fn(&CallContext, &DeliveredMessage, &anyhow::Error) -> String + Send + Sync>;

fn default_nack_reason(
    _ctx: &CallContext,
    _message: &DeliveredMessage,
    err: &anyhow::Error,
) -> String {
    format!("{:#}", err)
}

/// Cut `reason` to at most `max_bytes`, backing off to a character boundary
pub fn truncate_reason(reason: &str, max_bytes: usize) -> String {
    if reason.len() <= max_bytes {
        return reason.to_string();
    }
    let mut end = max_bytes;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[derive(Default)]
pub struct WorkerBuilder {
    client: Option<DriftqClient>,
    consume: ConsumeOptions,
    handler: Option<Arc<dyn StepHandler>>,
    concurrency: usize,
    on_error: Option<ErrorCallback>,
    nack_reason: Option<NackReasonFn>,
    max_nack_reason_bytes: usize,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, client: DriftqClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn consume(mut self, options: ConsumeOptions) -> Self {
        self.consume = options;
        self
    }

    pub fn handler(mut self, handler: impl StepHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Maximum handlers running at once, clamped to `1..=Semaphore::MAX_PERMITS`
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Called for stream errors and failed acks/nacks
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn nack_reason<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &DeliveredMessage, &anyhow::Error) -> String + Send + Sync + 'static,
    {
        self.nack_reason = Some(Arc::new(f));
        self
    }

    pub fn max_nack_reason_bytes(mut self, max: usize) -> Self {
        self.max_nack_reason_bytes = max;
        self
    }

    pub fn build(self) -> Result<Worker> {
        let client = self
            .client
            .ok_or_else(|| ClientError::InvalidConfig("worker: client is required".to_string()))?;
        let handler = self
            .handler
            .ok_or_else(|| ClientError::InvalidConfig("worker: handler is required".to_string()))?;
        if self.consume.validate().is_err() {
            return Err(ClientError::InvalidConfig(
                "worker: consume options require topic, group, and owner".to_string(),
            ));
        }

        let max_nack_reason_bytes = match self.max_nack_reason_bytes {
            0 => DEFAULT_MAX_NACK_REASON_BYTES,
            max => max,
        };

        Ok(Worker {
            shared: Arc::new(Shared {
                client,
                consume: self.consume,
                handler,
                on_error: self.on_error,
                nack_reason: self
                    .nack_reason
                    .unwrap_or_else(|| Arc::new(default_nack_reason) as NackReasonFn),
                max_nack_reason_bytes,
            }),
            concurrency: self.concurrency.clamp(1, Semaphore::MAX_PERMITS),
        })
    }
}

struct Shared {
    client: DriftqClient,
    consume: ConsumeOptions,
    handler: Arc<dyn StepHandler>,
    on_error: Option<ErrorCallback>,
    nack_reason: NackReasonFn,
    max_nack_reason_bytes: usize,
}

pub struct Worker {
    shared: Arc<Shared>,
    concurrency: usize,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("consume", &self.shared.consume)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Consume until `ctx` is done or the stream ends.
    ///
    /// Cancellation and a clean end of stream return `Ok`. A stream error is
    /// reported through `on_error` and returned. In every case all handlers
    /// already dispatched finish before this returns.
    pub async fn run(&self, ctx: &CallContext) -> Result<()> {
        let consume = &self.shared.consume;
        let mut stream = self.shared.client.open_stream(ctx, consume).await?;

        info!(
            "Worker started topic={} group={} owner={} concurrency={}",
            consume.topic, consume.group, consume.owner, self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tracker = TaskTracker::new();

        let outcome = loop {
            let message = tokio::select! {
                biased;
                _ = ctx.done() => break Ok(()),
                message = stream.messages.recv() => message,
            };

            let Some(message) = message else {
                break match stream.take_error() {
                    Some(err) => {
                        self.shared.report(&err);
                        Err(err)
                    }
                    None => Ok(()),
                };
            };

            let permit = tokio::select! {
                biased;
                _ = ctx.done() => break Ok(()),
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(ClientError::Internal("worker semaphore closed".to_string())),
                },
            };

            let shared = self.shared.clone();
            let ctx = ctx.clone();
            tracker.spawn(async move {
                let _permit = permit;
                shared.process(&ctx, message).await;
            });
        };

        tracker.close();
        tracker.wait().await;

        info!(
            "Worker stopped topic={} group={} owner={}",
            consume.topic, consume.group, consume.owner
        );
        outcome
    }
}

impl Shared {
    fn report(&self, err: &ClientError) {
        warn!(category = err.category(), "worker error: {}", err);
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }

    async fn process(&self, ctx: &CallContext, message: DeliveredMessage) {
        let handler_ctx = match message.deadline() {
            Some(at) => ctx.with_deadline(at),
            None => ctx.clone(),
        };

        let outcome = AssertUnwindSafe(self.handler.handle(&handler_ctx, &message))
            .catch_unwind()
            .await;

        // Outcomes are reported even if the worker is shutting down
        let report_ctx = ctx.detached();
        let (partition, offset) = (message.partition, message.offset);

        let reason = match outcome {
            Ok(Ok(())) => {
                debug!("handled partition={} offset={}", partition, offset);
                let req = self.consume.ack(partition, offset);
                if let Err(err) = self.client.ack(&report_ctx, &req).await {
                    self.report(&err);
                }
                return;
            }
            Ok(Err(err)) => (self.nack_reason)(&handler_ctx, &message, &err),
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(&*panic));
                self.report(&ClientError::Internal(reason.clone()));
                reason
            }
        };

        let reason = truncate_reason(&reason, self.max_nack_reason_bytes);
        debug!("nacking partition={} offset={} reason={:?}", partition, offset, reason);
        let reason = (!reason.is_empty()).then_some(reason);
        let req = self.consume.nack(partition, offset, reason);
        if let Err(err) = self.client.nack(&report_ctx, &req).await {
            self.report(&err);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use proptest::prelude::*;

    fn client() -> DriftqClient {
        DriftqClient::new(ClientConfig::new("http://localhost:8080")).unwrap()
    }

    fn noop() -> impl StepHandler {
        step_fn(|_ctx, _msg| async { anyhow::Ok(()) })
    }

    #[test]
    fn test_build_requires_client_and_handler() {
        let err = WorkerBuilder::new()
            .consume(ConsumeOptions::new("t", "g", "o"))
            .handler(noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));

        let err = client()
            .worker()
            .consume(ConsumeOptions::new("t", "g", "o"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_requires_identity() {
        let err = client()
            .worker()
            .consume(ConsumeOptions::new("t", "", "o"))
            .handler(noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_defaults() {
        let worker = client()
            .worker()
            .consume(ConsumeOptions::new("t", "g", "o"))
            .handler(noop())
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(worker.concurrency(), 1);
        assert_eq!(worker.shared.max_nack_reason_bytes, DEFAULT_MAX_NACK_REASON_BYTES);

        let err = anyhow::anyhow!("boom").context("step failed");
        let msg = DeliveredMessage::default();
        let reason = (worker.shared.nack_reason)(&CallContext::background(), &msg, &err);
        assert_eq!(reason, "step failed: boom");
    }

    #[test]
    fn test_build_clamps_huge_concurrency() {
        let worker = client()
            .worker()
            .consume(ConsumeOptions::new("t", "g", "o"))
            .handler(noop())
            .concurrency(usize::MAX)
            .build()
            .unwrap();
        assert_eq!(worker.concurrency(), Semaphore::MAX_PERMITS);
        // The run loop sizes its semaphore from this value
        let semaphore = Semaphore::new(worker.concurrency());
        assert_eq!(semaphore.available_permits(), Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_truncate_reason() {
        assert_eq!(truncate_reason("short", 10), "short");
        assert_eq!(truncate_reason("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_reason("abcdefghijkl", 4), "abcd");
        // 'é' is two bytes; never split it
        assert_eq!(truncate_reason("aé", 2), "a");
        assert_eq!(truncate_reason("", 4), "");
    }

    #[test]
    fn test_panic_message() {
        let panic = std::panic::catch_unwind(|| panic!("bad input")).unwrap_err();
        assert_eq!(panic_message(&*panic), "bad input");
        let panic = std::panic::catch_unwind(|| panic!("offset {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*panic), "offset 7");
    }

    proptest! {
        #[test]
        fn prop_truncated_reason_fits(reason in ".*", max in 1usize..64) {
            let out = truncate_reason(&reason, max);
            prop_assert!(out.len() <= max);
            prop_assert!(reason.starts_with(&out));
        }
    }
}
