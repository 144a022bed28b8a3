use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message delivered by the broker on a consume stream.
///
/// Every delivery is independent: a nacked or lease-expired message comes
/// back as a new delivery of the same (partition, offset) with `attempts`
/// incremented and, after a nack, `last_error` carrying the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    /// Partition index
    pub partition: u32,

    /// Offset within the partition
    pub offset: u64,

    /// Delivery attempt, starting at 1
    #[serde(default = "first_attempt")]
    pub attempts: u32,

    /// Message key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Message payload
    #[serde(default)]
    pub value: String,

    /// Reason recorded by the previous nack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Routing decision attached by the broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<Routing>,

    /// Producer-supplied metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
}

fn first_attempt() -> u32 {
    1
}

impl Default for DeliveredMessage {
    fn default() -> Self {
        Self {
            partition: 0,
            offset: 0,
            attempts: first_attempt(),
            key: None,
            value: String::new(),
            last_error: None,
            routing: None,
            envelope: None,
        }
    }
}

/// Routing label and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub label: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

/// Producer-side redelivery guidance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

/// Structured metadata riding alongside a payload.
///
/// The worker only looks at `deadline`; everything else is passed through
/// to the handler untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_override: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl Envelope {
    /// Set the idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the absolute processing deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set run and step identifiers
    pub fn with_step(mut self, run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self.step_id = Some(step_id.into());
        self
    }
}

impl DeliveredMessage {
    /// Envelope deadline, if the producer set one
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.envelope.as_ref().and_then(|e| e.deadline)
    }

    /// True when this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.attempts > 1
    }

    /// Payload size in bytes including the key
    pub fn size(&self) -> usize {
        self.value.len() + self.key.as_ref().map_or(0, |k| k.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_minimal_line() {
        let line = r#"{"partition":0,"offset":1,"attempts":1,"key":"k","value":"v"}"#;
        let msg: DeliveredMessage = serde_json::from_str(line).unwrap();
        assert_eq!(
            msg,
            DeliveredMessage {
                partition: 0,
                offset: 1,
                attempts: 1,
                key: Some("k".to_string()),
                value: "v".to_string(),
                last_error: None,
                routing: None,
                envelope: None,
            }
        );
        assert!(!msg.is_redelivery());
        assert_eq!(msg.deadline(), None);
    }

    #[test]
    fn test_decode_redelivery_with_envelope() {
        let line = r#"{
            "partition": 3,
            "offset": 18446744073709551615,
            "attempts": 2,
            "value": "payload",
            "last_error": "boom",
            "routing": {"label": "fast", "meta": {"region": "eu"}},
            "envelope": {
                "run_id": "run-1",
                "step_id": "step-2",
                "tenant_id": "acme",
                "deadline": "2030-01-01T00:00:00Z",
                "partition_override": 7,
                "retry_policy": {"max_attempts": 5, "backoff_ms": 100}
            }
        }"#;
        let msg: DeliveredMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.offset, u64::MAX);
        assert_eq!(msg.key, None);
        assert_eq!(msg.last_error.as_deref(), Some("boom"));
        assert!(msg.is_redelivery());

        let routing = msg.routing.as_ref().unwrap();
        assert_eq!(routing.label, "fast");
        assert_eq!(routing.meta.get("region").map(String::as_str), Some("eu"));

        let envelope = msg.envelope.as_ref().unwrap();
        assert_eq!(envelope.run_id.as_deref(), Some("run-1"));
        assert_eq!(envelope.partition_override, Some(7));
        assert_eq!(
            envelope.retry_policy,
            Some(RetryPolicy {
                max_attempts: Some(5),
                backoff_ms: Some(100),
                max_backoff_ms: None,
            })
        );
        assert_eq!(
            msg.deadline().unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_empty_envelope_serializes_empty() {
        let json = serde_json::to_string(&Envelope::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
