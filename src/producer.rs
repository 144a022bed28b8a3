use crate::{
    client::DriftqClient,
    context::CallContext,
    error::Result,
    message::Envelope,
    types::{ProduceRequest, ProduceResponse},
};

/// Publishes to a single topic through a shared client
#[derive(Debug, Clone)]
pub struct Producer {
    client: DriftqClient,
    topic: String,
}

impl Producer {
    pub fn new(client: DriftqClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `value` with an optional key and envelope.
    ///
    /// Sends carrying an envelope idempotency key are retried on transient
    /// failures; all others get a single attempt.
    pub async fn send(
        &self,
        ctx: &CallContext,
        key: Option<&str>,
        value: impl Into<String>,
        envelope: Option<Envelope>,
    ) -> Result<ProduceResponse> {
        let mut req = ProduceRequest::new(self.topic.clone(), value);
        if let Some(key) = key {
            req = req.with_key(key);
        }
        if let Some(envelope) = envelope {
            req = req.with_envelope(envelope);
        }
        self.client.produce(ctx, &req).await
    }
}
