use crate::{
    config::ClientConfig,
    context::CallContext,
    error::{ApiError, ClientError, Result},
    producer::Producer,
    transport::{layered, ExecuteOptions, HttpTransport, Transport, IDEMPOTENCY_KEY_HEADER},
    types::{
        validate_identity, AckRequest, ErrorResponse, HealthzResponse, NackRequest,
        ProduceRequest, ProduceResponse, VersionResponse,
    },
    worker::WorkerBuilder,
};
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Main DriftQ client. Cheap to clone; clones share the connection pool
/// and the transport stack.
#[derive(Clone)]
pub struct DriftqClient {
    config: Arc<ClientConfig>,
    base_url: String,
    http: reqwest::Client,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DriftqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftqClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DriftqClient {
    /// Create a new client over HTTP
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        let base: Arc<dyn Transport> = Arc::new(HttpTransport::new(http.clone()));
        Self::assemble(config, http, base)
    }

    /// Create a client whose layers wrap a caller-supplied base transport
    pub fn with_transport(config: ClientConfig, base: Arc<dyn Transport>) -> Result<Self> {
        let http = build_http_client(&config)?;
        Self::assemble(config, http, base)
    }

    fn assemble(config: ClientConfig, http: reqwest::Client, base: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        let transport = layered(base, &config);

        debug!("Created DriftQ client for {}", base_url);
        Ok(Self {
            config: Arc::new(config),
            base_url,
            http,
            transport,
        })
    }

    /// Get client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Broker base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ClientError::InvalidConfig(format!("Invalid URL path: {}", e)))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Helper to build request with authentication
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.config.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }

    /// Execute a JSON call and return the raw body; `None` for 204.
    ///
    /// The configured timeout covers the whole exchange, body included,
    /// unless the context already has a deadline.
    async fn call<I>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        body: Option<&I>,
        idempotency_key: Option<&str>,
    ) -> Result<Option<Bytes>>
    where
        I: Serialize + ?Sized,
    {
        let ctx = if self.config.timeout.is_zero() || ctx.deadline().is_some() {
            ctx.clone()
        } else {
            ctx.with_timeout(self.config.timeout)
        };

        let mut builder = self
            .request(method, self.endpoint(path, &[])?)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(key) = idempotency_key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        let request = builder.build()?;

        let response = self
            .transport
            .execute(&ctx, request, ExecuteOptions::default())
            .await?;
        let status = response.status();
        let body = ctx.run(response.bytes()).await??;

        if status.as_u16() >= 400 {
            return Err(api_error(status, &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(body))
    }

    /// Check broker liveness
    pub async fn healthz(&self, ctx: &CallContext) -> Result<HealthzResponse> {
        let body = self.call::<()>(ctx, Method::GET, "/v1/healthz", None, None).await?;
        decode(body)
    }

    /// Broker build information
    pub async fn version(&self, ctx: &CallContext) -> Result<VersionResponse> {
        let body = self.call::<()>(ctx, Method::GET, "/v1/version", None, None).await?;
        decode(body)
    }

    /// Publish one message. An envelope idempotency key is forwarded as the
    /// `Idempotency-Key` header, which also makes the call retry-safe.
    pub async fn produce(&self, ctx: &CallContext, req: &ProduceRequest) -> Result<ProduceResponse> {
        if req.topic.is_empty() {
            return Err(ClientError::InvalidRequest("topic is required".to_string()));
        }
        let body = self
            .call(ctx, Method::POST, "/v1/produce", Some(req), req.idempotency_key())
            .await?;
        match body {
            Some(_) => decode(body),
            None => Ok(ProduceResponse::default()),
        }
    }

    /// Confirm successful processing of a leased message
    pub async fn ack(&self, ctx: &CallContext, req: &AckRequest) -> Result<()> {
        validate_identity(&req.topic, &req.group, &req.owner)?;
        debug!("ack topic={} partition={} offset={}", req.topic, req.partition, req.offset);
        self.call(ctx, Method::POST, "/v1/ack", Some(req), None).await?;
        Ok(())
    }

    /// Report failed processing; the broker redelivers with `attempts + 1`
    pub async fn nack(&self, ctx: &CallContext, req: &NackRequest) -> Result<()> {
        validate_identity(&req.topic, &req.group, &req.owner)?;
        debug!("nack topic={} partition={} offset={}", req.topic, req.partition, req.offset);
        self.call(ctx, Method::POST, "/v1/nack", Some(req), None).await?;
        Ok(())
    }

    /// Producer bound to a topic
    pub fn producer(&self, topic: impl Into<String>) -> Producer {
        Producer::new(self.clone(), topic)
    }

    /// Worker builder with this client preset
    pub fn worker(&self) -> WorkerBuilder {
        WorkerBuilder::new().client(self.clone())
    }
}

fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(config.effective_user_agent());

    if let Some(connect_timeout) = config.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }

    if let Some(tls) = &config.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &tls.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| ClientError::InvalidConfig(format!("Invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
    }

    builder
        .build()
        .map_err(|e| ClientError::Connection(format!("Failed to create HTTP client: {}", e)))
}

/// Map a non-success response to a structured error; the body is decoded
/// best-effort
pub(crate) fn api_error(status: StatusCode, body: &[u8]) -> ClientError {
    let parsed: ErrorResponse = serde_json::from_slice(body).unwrap_or_default();
    ClientError::Api(ApiError {
        status: status.as_u16(),
        code: parsed.error,
        message: parsed.message,
    })
}

fn decode<O: DeserializeOwned>(body: Option<Bytes>) -> Result<O> {
    let body = body.ok_or_else(|| {
        ClientError::Deserialization("empty response body".to_string())
    })?;
    serde_json::from_slice(&body).map_err(|e| {
        ClientError::Deserialization(format!("Failed to parse response: {}", e))
    })
}
