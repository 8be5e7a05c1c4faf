//! Simple consumer walkthrough against a local broker
//!
//! Consumes until ctrl-c, then drains gracefully. Records whose value
//! contains "poison" fail on purpose to show the retry ladder and DLQ
//! routing in action.

use std::sync::Arc;
use std::time::Duration;

use kafka_conduit::{
    handler_fn, BackendFactory as _, BackendRegistry, Consumer as _, ConsumerConfig, Result,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("kafka-conduit - simple consumer");
    println!("===============================");

    let registry = BackendRegistry::with_builtin();
    let factory = registry.get("Rdkafka")?;

    let config = ConsumerConfig::builder(
        vec!["localhost:9092"],
        "conduit-demo-topic",
        "conduit-demo-group",
    )
    .max_concurrent(4)
    .retry_policy(
        3,
        Duration::from_millis(200),
        Duration::from_secs(5),
        2.0,
    )
    .dlq("conduit-demo-dlq", true)
    .header_allowlist(vec!["trace-id"])
    .build()?;

    let handler = Arc::new(handler_fn(|msg| async move {
        let value = String::from_utf8_lossy(&msg.value);
        if value.contains("poison") {
            return Err(format!("cannot process offset {}", msg.offset).into());
        }
        println!(
            "   📨 {}:{} offset={} value='{}'",
            msg.topic, msg.partition, msg.offset, value
        );
        Ok(())
    }));

    let mut consumer = factory.consumer(config, handler).await?;

    let shutdown = CancellationToken::new();
    consumer.start(shutdown.clone()).await?;
    println!("✅ Consuming; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(kafka_conduit::ConduitError::Io)?;
    println!("\nshutting down...");

    shutdown.cancel();
    consumer.close(Duration::from_secs(30)).await?;
    println!("✅ Consumer closed");
    Ok(())
}
