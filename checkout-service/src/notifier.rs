use anyhow::Result;
use async_trait::async_trait;
use diesel_async::RunQueryDsl;
use shared::{OrderPlacedNotification, OutboxEvent};

use crate::models::DbOutboxEvent;
use crate::schema::outbox_events;
use crate::store::postgres::DbPool;

/// Downstream hand-off once an order is committed. Callers treat it as
/// fire-and-forget.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, notification: OrderPlacedNotification) -> Result<()>;
}

/// Queues the notification in the outbox; `OutboxProcessor` relays it.
pub struct OutboxNotifier {
    pool: DbPool,
}

impl OutboxNotifier {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderNotifier for OutboxNotifier {
    async fn notify(&self, notification: OrderPlacedNotification) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let event = DbOutboxEvent::from(OutboxEvent::order_placed(&notification)?);

        diesel::insert_into(outbox_events::table)
            .values(&event)
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
