// DriftQ redelivery example: nack a message once, then ack its redelivery
use driftq_client::{CallContext, ClientConfig, ConsumeOptions, DriftqClient};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = DriftqClient::new(ClientConfig::new("http://localhost:8080"))?;
    let ctx = CallContext::background();
    let options = ConsumeOptions::new("demo", "group1", "worker-1").with_lease_ms(5_000);

    let mut stream = client.open_stream(&ctx, &options).await?;
    let mut nacked_once = false;

    while let Some(msg) = stream.messages.recv().await {
        info!(
            "[consume] partition={} offset={} key={:?} value={:?} attempts={}",
            msg.partition, msg.offset, msg.key, msg.value, msg.attempts
        );

        if !nacked_once {
            nacked_once = true;
            info!("[nack] simulate failure, message should redeliver");
            let req = options.nack(msg.partition, msg.offset, Some("testing redelivery".to_string()));
            client.nack(&ctx, &req).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        }

        info!("[ack] redelivered with last_error={:?}", msg.last_error);
        client.ack(&ctx, &options.ack(msg.partition, msg.offset)).await?;
        info!("done");
        return Ok(());
    }

    match stream.take_error() {
        Some(err) => Err(err.into()),
        None => {
            info!("stream closed");
            Ok(())
        }
    }
}
