//! Streaming consumption over NDJSON.
//!
//! [`DriftqClient::open_stream`] issues one long-lived `GET /v1/consume` and
//! hands the response body to a reader task. The task decodes one
//! [`DeliveredMessage`] per line and pushes it onto a capacity-1 channel, so
//! the broker is read no faster than messages are taken. A malformed line or
//! a broken connection is pushed once onto the error channel and ends the
//! stream; a clean end of body or cancellation ends it silently. The stream
//! is never reopened automatically.

use crate::{
    client::{api_error, DriftqClient},
    context::CallContext,
    error::{ClientError, Result},
    message::DeliveredMessage,
    transport::ExecuteOptions,
    types::ConsumeOptions,
};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Method, Response};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Content type of the consume stream
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Longest line accepted from the stream
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Receiving half of an open consume stream.
///
/// `messages` closes when the stream ends for any reason. If it ended on a
/// failure, exactly one error is waiting in `errors` by then.
#[derive(Debug)]
pub struct MessageStream {
    pub messages: mpsc::Receiver<DeliveredMessage>,
    pub errors: mpsc::Receiver<ClientError>,
}

impl MessageStream {
    /// Terminal error of a finished stream, if one was queued
    pub fn take_error(&mut self) -> Option<ClientError> {
        self.errors.try_recv().ok()
    }
}

impl Stream for MessageStream {
    type Item = Result<DeliveredMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.messages.poll_recv(cx) {
            Poll::Ready(Some(message)) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(None) => Poll::Ready(self.take_error().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl DriftqClient {
    /// Open a consume stream for `options`.
    ///
    /// Fails before returning if the connection cannot be made or the broker
    /// answers with a non-success status. The stream lives until `ctx` is
    /// done or the broker closes it; the default timeout does not apply.
    pub async fn open_stream(
        &self,
        ctx: &CallContext,
        options: &ConsumeOptions,
    ) -> Result<MessageStream> {
        options.validate()?;

        let mut query = vec![
            ("topic", options.topic.clone()),
            ("group", options.group.clone()),
            ("owner", options.owner.clone()),
        ];
        if options.lease_ms > 0 {
            query.push(("lease_ms", options.lease_ms.to_string()));
        }

        let request = self
            .request(Method::GET, self.endpoint("/v1/consume", &query)?)
            .header(ACCEPT, NDJSON_CONTENT_TYPE)
            .build()?;

        let response = self
            .transport()
            .execute(ctx, request, ExecuteOptions::streaming())
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = ctx.run(response.bytes()).await?.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        info!(
            "Opened consume stream topic={} group={} owner={}",
            options.topic, options.group, options.owner
        );

        let (message_tx, message_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        tokio::spawn(read_stream(ctx.clone(), response, message_tx, error_tx));

        Ok(MessageStream {
            messages: message_rx,
            errors: error_rx,
        })
    }
}

async fn read_stream(
    ctx: CallContext,
    response: Response,
    messages: mpsc::Sender<DeliveredMessage>,
    errors: mpsc::Sender<ClientError>,
) {
    let body = response
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let mut lines = Box::pin(FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    ));

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => break,
            next = lines.next() => next,
        };

        let line = match next {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                // A read failing because the context ended is a shutdown
                if !ctx.is_done() {
                    report(&errors, ClientError::from(err));
                }
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: DeliveredMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                report(
                    &errors,
                    ClientError::Deserialization(format!("decode NDJSON: {}", err)),
                );
                break;
            }
        };

        debug!(
            "delivered partition={} offset={} attempts={}",
            message.partition, message.offset, message.attempts
        );

        tokio::select! {
            biased;
            _ = ctx.done() => break,
            sent = messages.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!("consume stream closed");
}

fn report(errors: &mpsc::Sender<ClientError>, err: ClientError) {
    if let Err(TrySendError::Full(dropped) | TrySendError::Closed(dropped)) = errors.try_send(err) {
        debug!("dropping consume stream error: {}", dropped);
    }
}
