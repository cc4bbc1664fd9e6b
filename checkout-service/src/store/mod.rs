//! Persistence seam for the checkout workflow.
//!
//! Every method is one independent round trip to the data store. Nothing here
//! spans a transaction across calls; the orchestrator owns the sequencing and
//! the failure policy between them.

pub mod postgres;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{FlashSale, Product, ReconciliationIssue};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{OrderHeader, OrderLine, ProcessedCheckout};

pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub new_stock: i32,
    /// The requested quantity exceeded the stock on hand and stock was
    /// floored at zero instead.
    pub oversold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleCountUpdate {
    Applied { sales_count: i32 },
    /// A capped increment would have pushed the counter past its cap; the
    /// counter was left untouched.
    RejectedAtCap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutClaim {
    /// The caller now owns the key and may write the order.
    Claimed,
    /// The key already produced an order.
    Processed(ProcessedCheckout),
    /// Another checkout holds the key and has not recorded its order yet.
    InFlight,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

    /// Sales for the given products that are switched on and whose window
    /// contains `at`. Exhaustion is left to the pricing rules.
    async fn live_flash_sales(&self, product_ids: &[Uuid], at: DateTime<Utc>) -> Result<Vec<FlashSale>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the header and returns the id the store generated for it.
    async fn insert_order(&self, header: &OrderHeader) -> Result<Uuid, StoreError>;

    /// Inserts all items of an order as a single statement.
    async fn insert_order_items(&self, order_id: Uuid, lines: &[OrderLine]) -> Result<(), StoreError>;

    /// Claims `key` for the calling checkout. At most one caller holds the
    /// claim on a key at any time.
    async fn claim_checkout(&self, key: &str) -> Result<CheckoutClaim, StoreError>;

    /// Turns the caller's claim into a processed checkout.
    async fn complete_checkout(&self, record: &ProcessedCheckout) -> Result<(), StoreError>;

    /// Drops a claim that never produced an order. Processed keys are kept.
    async fn release_checkout(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Atomically lowers stock by `quantity`, flooring at zero.
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<StockDecrement, StoreError>;

    /// Atomically raises `sales_count` by `quantity`. With `cap` set the
    /// increment only happens if the result stays within it.
    async fn increment_sales_count(
        &self,
        sale_id: Uuid,
        quantity: i32,
        cap: Option<i32>,
    ) -> Result<SaleCountUpdate, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Deletes every cart item of the user, returning how many went away.
    async fn clear_cart(&self, user_id: Uuid) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn flag_issue(&self, issue: &ReconciliationIssue) -> Result<(), StoreError>;
}

pub trait CheckoutStore: CatalogStore + OrderStore + InventoryStore + CartStore + IssueStore {}

impl<T> CheckoutStore for T where T: CatalogStore + OrderStore + InventoryStore + CartStore + IssueStore {}
