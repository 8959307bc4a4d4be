use crate::config::AppConfig;
use crate::processor::ReportSequencer;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consumes GPS location reports with SASL authentication, backing off
/// behind a circuit breaker when the broker keeps failing.
///
/// Payloads are handed to the sequencer, which applies each trip's reports
/// in the order they were consumed.
pub async fn start_location_consumer(
    config: AppConfig,
    sequencer: ReportSequencer,
) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("security.protocol", &config.kafka_security_protocol);

    if config.kafka_security_protocol.starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);
    }

    let consumer: StreamConsumer = client_config.create()?;
    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures), sleeping for {} seconds",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::time::sleep(cooldown).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming consumption");
        }

        match consumer.recv().await {
            Ok(m) => {
                consecutive_failures = 0;

                let Some(payload) = m.payload() else {
                    warn!("Received empty payload from Kafka");
                    continue;
                };

                sequencer.submit(payload.to_vec());
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {} ({} / {})",
                    e, consecutive_failures, max_retries
                );
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
