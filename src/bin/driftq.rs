//! DriftQ CLI - health checks, produce, and a printing consumer

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use driftq_client::{
    step_fn, CallContext, ClientConfig, ConsumeOptions, DeliveredMessage, DriftqClient, Envelope,
};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftq")]
#[command(about = "DriftQ client - produce and consume against a DriftQ broker")]
#[command(version)]
struct Cli {
    /// Broker base URL
    #[arg(long)]
    base_url: Option<String>,

    /// TOML client configuration file
    #[arg(long)]
    config: Option<String>,

    /// Default per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check broker liveness
    Healthz,
    /// Show broker version
    Version,
    /// Publish one message
    Produce(ProduceArgs),
    /// Consume and print messages until Ctrl+C
    Consume(ConsumeArgs),
}

#[derive(Args)]
struct ProduceArgs {
    /// Topic name
    topic: String,
    /// Message payload
    value: String,
    /// Message key
    #[arg(long)]
    key: Option<String>,
    /// Idempotency key; makes the send retry-safe
    #[arg(long)]
    idempotency_key: Option<String>,
}

#[derive(Args)]
struct ConsumeArgs {
    /// Topic name
    topic: String,
    /// Consumer group
    #[arg(long, default_value = "driftq-cli")]
    group: String,
    /// Owner identity; generated when omitted
    #[arg(long)]
    owner: Option<String>,
    /// Lease duration in milliseconds
    #[arg(long, default_value = "0")]
    lease_ms: u64,
    /// Handlers running at once
    #[arg(long, default_value = "1")]
    concurrency: usize,
    /// Nack every message instead of acking
    #[arg(long)]
    nack: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => ClientConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout = Duration::from_millis(timeout_ms);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let client = DriftqClient::new(config)?;

    let ctx = CallContext::background();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            shutdown.cancel();
        }
    });

    match cli.command {
        Commands::Healthz => {
            let health = client.healthz(&ctx).await?;
            println!("{}", health.status);
        }
        Commands::Version => {
            let version = client.version(&ctx).await?;
            println!(
                "version={} commit={} wal_enabled={}",
                version.version, version.commit, version.wal_enabled
            );
        }
        Commands::Produce(args) => {
            let envelope = args
                .idempotency_key
                .map(|key| Envelope::default().with_idempotency_key(key));
            let resp = client
                .producer(args.topic)
                .send(&ctx, args.key.as_deref(), args.value, envelope)
                .await?;
            println!("{} {}", resp.status, resp.topic);
        }
        Commands::Consume(args) => consume(client, &ctx, args).await?,
    }

    Ok(())
}

async fn consume(client: DriftqClient, ctx: &CallContext, args: ConsumeArgs) -> anyhow::Result<()> {
    let owner = args
        .owner
        .unwrap_or_else(|| format!("driftq-cli-{}", uuid::Uuid::new_v4()));
    let nack = args.nack;

    let worker = client
        .worker()
        .consume(ConsumeOptions::new(args.topic, args.group, owner).with_lease_ms(args.lease_ms))
        .concurrency(args.concurrency)
        .on_error(|err| error!("consume error: {}", err))
        .handler(step_fn(move |_ctx: CallContext, msg: DeliveredMessage| async move {
            println!(
                "partition={} offset={} attempts={} key={} value={}",
                msg.partition,
                msg.offset,
                msg.attempts,
                msg.key.as_deref().unwrap_or("-"),
                msg.value
            );
            if nack {
                anyhow::bail!("nacked from cli");
            }
            Ok(())
        }))
        .build()?;

    worker.run(ctx).await?;
    Ok(())
}
