// DriftQ worker example: ack the first ten messages, then stop
use driftq_client::{step_fn, CallContext, ClientConfig, ConsumeOptions, DriftqClient};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_MESSAGES: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = DriftqClient::new(ClientConfig::new("http://localhost:8080"))?;

    let ctx = CallContext::background();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let seen = Arc::new(AtomicU32::new(0));
    let stop = ctx.clone();
    let worker = client
        .worker()
        .consume(ConsumeOptions::new("demo", "demo", "worker-1").with_lease_ms(30_000))
        .concurrency(4)
        .on_error(|err| warn!("worker error: {}", err))
        .handler(step_fn(move |_ctx, msg| {
            let seen = seen.clone();
            let stop = stop.clone();
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                println!(
                    "got #{} p={} off={} key={:?} value={:?}",
                    n, msg.partition, msg.offset, msg.key, msg.value
                );

                // Simulated work
                tokio::time::sleep(Duration::from_millis(50)).await;

                if n >= MAX_MESSAGES {
                    stop.cancel();
                }
                anyhow::Ok(())
            }
        }))
        .build()?;

    info!("starting worker topic=demo group=demo owner=worker-1");
    worker.run(&ctx).await?;
    info!("worker stopped");
    Ok(())
}
