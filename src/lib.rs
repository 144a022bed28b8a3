//! DriftQ client core.
//!
//! Reliable consumption from a DriftQ broker over HTTP: a resilient
//! transport (default deadline, trace propagation, retry with backoff), an
//! NDJSON streaming consumer, and a worker that fans messages out to a
//! handler under a concurrency bound and acks or nacks each one.

pub mod client;
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod message;
pub mod producer;
pub mod transport;
pub mod types;
pub mod worker;

pub use client::DriftqClient;
pub use config::{ClientConfig, RetryConfig, TlsConfig, TracingConfig};
pub use consumer::MessageStream;
pub use context::CallContext;
pub use error::{ApiError, ClientError, Result};
pub use message::{DeliveredMessage, Envelope, RetryPolicy, Routing};
pub use producer::Producer;
pub use types::{
    AckRequest, ConsumeOptions, HealthzResponse, NackRequest, ProduceRequest, ProduceResponse,
    VersionResponse,
};
pub use worker::{step_fn, StepHandler, Worker, WorkerBuilder};

/// Crate version, sent in the default user agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
