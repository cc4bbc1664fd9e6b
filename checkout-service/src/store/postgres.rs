use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{FlashSale, Product, ReconciliationIssue};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CartStore, CatalogStore, CheckoutClaim, InventoryStore, IssueStore, OrderStore, SaleCountUpdate,
    StockDecrement,
};
use crate::error::StoreError;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Age after which an unfinished checkout claim counts as abandoned.
const STALE_CLAIM_MINUTES: i64 = 10;

/// Conditional decrement attempts before giving up on a row that keeps
/// being restocked between the decrement and the floor update.
const MAX_DECREMENT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let mut conn = self.conn().await?;

        let rows = products::table
            .filter(products::id.eq_any(ids.to_vec()))
            .load::<DbProduct>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn live_flash_sales(&self, product_ids: &[Uuid], at: DateTime<Utc>) -> Result<Vec<FlashSale>, StoreError> {
        let mut conn = self.conn().await?;

        let rows = flash_sales::table
            .filter(flash_sales::product_id.eq_any(product_ids.to_vec()))
            .filter(flash_sales::is_active.eq(true))
            .filter(flash_sales::start_date.le(at))
            .filter(flash_sales::end_date.ge(at))
            .order(flash_sales::created_at.desc())
            .load::<DbFlashSale>(&mut conn)
            .await?;

        rows.into_iter().map(FlashSale::try_from).collect()
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, header: &OrderHeader) -> Result<Uuid, StoreError> {
        let mut conn = self.conn().await?;
        let new_order = NewOrder::try_from(header)?;

        let order_id = diesel::insert_into(orders::table)
            .values(&new_order)
            .returning(orders::id)
            .get_result::<Uuid>(&mut conn)
            .await?;

        Ok(order_id)
    }

    async fn insert_order_items(&self, order_id: Uuid, lines: &[OrderLine]) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let items: Vec<NewOrderItem> = lines.iter().map(|line| NewOrderItem::for_order(order_id, line)).collect();

        diesel::insert_into(order_items::table)
            .values(&items)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn claim_checkout(&self, key: &str) -> Result<CheckoutClaim, StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let inserted = diesel::insert_into(processed_checkouts::table)
            .values(&NewCheckoutClaim { idempotency_key: key.to_string(), claimed_at: now })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        if inserted == 1 {
            return Ok(CheckoutClaim::Claimed);
        }

        // A holder that died between claiming and recording leaves a claim
        // behind; once it is old enough the next caller takes it over.
        let taken_over = diesel::update(
            processed_checkouts::table
                .filter(processed_checkouts::idempotency_key.eq(key))
                .filter(processed_checkouts::order_id.is_null())
                .filter(processed_checkouts::claimed_at.lt(now - Duration::minutes(STALE_CLAIM_MINUTES))),
        )
        .set(processed_checkouts::claimed_at.eq(now))
        .execute(&mut conn)
        .await?;
        if taken_over == 1 {
            warn!(%key, "Took over a stale checkout claim");
            return Ok(CheckoutClaim::Claimed);
        }

        let row = processed_checkouts::table
            .filter(processed_checkouts::idempotency_key.eq(key))
            .first::<DbProcessedCheckout>(&mut conn)
            .await
            .optional()?;

        match row {
            Some(row) => CheckoutClaim::try_from(row),
            // Released between our insert and the read; the caller asks again.
            None => Ok(CheckoutClaim::InFlight),
        }
    }

    async fn complete_checkout(&self, record: &ProcessedCheckout) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let updated = diesel::update(
            processed_checkouts::table
                .filter(processed_checkouts::idempotency_key.eq(&record.idempotency_key))
                .filter(processed_checkouts::order_id.is_null()),
        )
        .set((
            processed_checkouts::order_id.eq(record.order_id),
            processed_checkouts::status.eq(record.status.as_str()),
            processed_checkouts::total_amount.eq(&record.total_amount),
            processed_checkouts::processed_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            return Err(StoreError::NotFound { entity: "checkout claim", id: record.order_id });
        }
        Ok(())
    }

    async fn release_checkout(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::delete(
            processed_checkouts::table
                .filter(processed_checkouts::idempotency_key.eq(key))
                .filter(processed_checkouts::order_id.is_null()),
        )
        .execute(&mut conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<StockDecrement, StoreError> {
        let mut conn = self.conn().await?;

        for attempt in 1..=MAX_DECREMENT_ATTEMPTS {
            let decremented = diesel::update(
                products::table
                    .filter(products::id.eq(product_id))
                    .filter(products::stock.ge(quantity)),
            )
            .set((
                products::stock.eq(products::stock - quantity),
                products::updated_at.eq(Utc::now()),
            ))
            .returning(products::stock)
            .get_result::<i32>(&mut conn)
            .await
            .optional()?;

            if let Some(new_stock) = decremented {
                return Ok(StockDecrement { new_stock, oversold: false });
            }

            let floored = diesel::update(
                products::table
                    .filter(products::id.eq(product_id))
                    .filter(products::stock.lt(quantity)),
            )
            .set((products::stock.eq(0), products::updated_at.eq(Utc::now())))
            .returning(products::stock)
            .get_result::<i32>(&mut conn)
            .await
            .optional()?;

            if let Some(new_stock) = floored {
                return Ok(StockDecrement { new_stock, oversold: true });
            }

            let exists = products::table
                .find(product_id)
                .select(products::id)
                .first::<Uuid>(&mut conn)
                .await
                .optional()?;

            if exists.is_none() {
                return Err(StoreError::NotFound { entity: "product", id: product_id });
            }

            debug!(%product_id, attempt, "Stock changed between decrement and floor, retrying");
        }

        Err(StoreError::Contention { entity: "product", id: product_id })
    }

    async fn increment_sales_count(
        &self,
        sale_id: Uuid,
        quantity: i32,
        cap: Option<i32>,
    ) -> Result<SaleCountUpdate, StoreError> {
        let mut conn = self.conn().await?;

        let updated = match cap {
            None => diesel::update(flash_sales::table.filter(flash_sales::id.eq(sale_id)))
                .set(flash_sales::sales_count.eq(flash_sales::sales_count + quantity))
                .returning(flash_sales::sales_count)
                .get_result::<i32>(&mut conn)
                .await
                .optional()?,
            Some(cap) => diesel::update(
                flash_sales::table
                    .filter(flash_sales::id.eq(sale_id))
                    .filter(flash_sales::sales_count.le(cap - quantity)),
            )
            .set(flash_sales::sales_count.eq(flash_sales::sales_count + quantity))
            .returning(flash_sales::sales_count)
            .get_result::<i32>(&mut conn)
            .await
            .optional()?,
        };

        if let Some(sales_count) = updated {
            return Ok(SaleCountUpdate::Applied { sales_count });
        }

        let exists = flash_sales::table
            .find(sale_id)
            .select(flash_sales::id)
            .first::<Uuid>(&mut conn)
            .await
            .optional()?;

        match (exists, cap) {
            (Some(_), Some(_)) => Ok(SaleCountUpdate::RejectedAtCap),
            _ => Err(StoreError::NotFound { entity: "flash sale", id: sale_id }),
        }
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn clear_cart(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;

        let deleted = diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user_id)))
            .execute(&mut conn)
            .await?;

        Ok(deleted)
    }
}

#[async_trait]
impl IssueStore for PgStore {
    async fn flag_issue(&self, issue: &ReconciliationIssue) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::insert_into(reconciliation_issues::table)
            .values(&NewReconciliationIssue::from(issue))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
