//! Request and response bodies exchanged with the broker.

use crate::error::{ClientError, Result};
use crate::message::Envelope;
use serde::{Deserialize, Serialize};

/// Identity and lease settings for a consume stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeOptions {
    pub topic: String,
    pub group: String,
    pub owner: String,
    /// Lease duration in milliseconds; 0 lets the broker choose
    #[serde(default)]
    pub lease_ms: u64,
}

impl ConsumeOptions {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            owner: owner.into(),
            lease_ms: 0,
        }
    }

    pub fn with_lease_ms(mut self, lease_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.topic, &self.group, &self.owner)
    }

    /// Ack for the given position under this identity
    pub fn ack(&self, partition: u32, offset: u64) -> AckRequest {
        AckRequest {
            topic: self.topic.clone(),
            group: self.group.clone(),
            owner: self.owner.clone(),
            partition,
            offset,
        }
    }

    /// Nack for the given position under this identity
    pub fn nack(&self, partition: u32, offset: u64, reason: Option<String>) -> NackRequest {
        NackRequest {
            topic: self.topic.clone(),
            group: self.group.clone(),
            owner: self.owner.clone(),
            partition,
            offset,
            reason,
        }
    }
}

pub(crate) fn validate_identity(topic: &str, group: &str, owner: &str) -> Result<()> {
    if topic.is_empty() || group.is_empty() || owner.is_empty() {
        return Err(ClientError::InvalidRequest(
            "topic, group, and owner are required".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRequest {
    pub topic: String,
    pub group: String,
    pub owner: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NackRequest {
    pub topic: String,
    pub group: String,
    pub owner: String,
    pub partition: u32,
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
}

impl ProduceRequest {
    pub fn new(topic: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            envelope: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Idempotency key carried by the envelope, if non-empty
    pub fn idempotency_key(&self) -> Option<&str> {
        self.envelope
            .as_ref()
            .and_then(|e| e.idempotency_key.as_deref())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthzResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub wal_enabled: bool,
}

/// Error body returned with a non-success status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}
