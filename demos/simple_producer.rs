//! Simple producer walkthrough against a local broker

use std::time::Duration;

use kafka_conduit::{
    BackendFactory as _, BackendRegistry, BalancerStrategy, ProduceMessage, Producer as _,
    ProducerConfig, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("kafka-conduit - simple producer");
    println!("===============================");

    let registry = BackendRegistry::with_builtin();
    let factory = registry.get("Rdkafka")?;

    let config = ProducerConfig::builder(vec!["localhost:9092"], "conduit-demo-topic")
        .balancer(BalancerStrategy::Hash)
        .send_timeout(Duration::from_secs(10))
        .client_id("conduit-demo-producer")
        .build()?;
    let producer = factory.producer(config).await?;
    println!("✅ Producer connected");

    for i in 0..10 {
        let key = format!("user-{}", i % 3);
        let msg = ProduceMessage::new(format!("message number {i}"))
            .with_key(key.clone())
            .with_header("trace-id", format!("demo-{i}"));
        producer.send(msg).await?;
        println!("   sent message {i} with key '{key}'");
    }

    producer.close().await?;
    println!("✅ Producer closed");
    Ok(())
}
