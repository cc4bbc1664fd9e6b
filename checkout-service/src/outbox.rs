use anyhow::Result;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::ORDER_PLACED_EVENT;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use crate::models::DbOutboxEvent;
use crate::schema::outbox_events;
use crate::store::postgres::DbPool;

const BATCH_SIZE: i64 = 100;

/// Relays queued outbox events to Kafka and marks them processed.
pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    notification_topic: String,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer, notification_topic: String, interval: Duration) -> Self {
        Self { pool, producer, notification_topic, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!(error = %e, "Error processing outbox events");
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let unprocessed_events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(BATCH_SIZE)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        if !unprocessed_events.is_empty() {
            debug!(count = unprocessed_events.len(), "Relaying outbox events");
        }

        for event in unprocessed_events {
            if let Err(e) = self.publish_event(&event).await {
                error!(event_id = %event.id, error = %e, "Failed to publish outbox event");
                continue;
            }

            diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;

            info!(event_id = %event.id, event_type = %event.event_type, "Published outbox event");
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let topic = topic_for(&event.event_type, &self.notification_topic);
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

fn topic_for<'a>(event_type: &str, notification_topic: &'a str) -> &'a str {
    match event_type {
        ORDER_PLACED_EVENT => notification_topic,
        _ => "checkout-events",
    }
}
