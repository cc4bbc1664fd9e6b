use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::CheckoutClaim;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::products)]
pub struct DbProduct {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::flash_sales)]
pub struct DbFlashSale {
    pub id: Uuid,
    pub product_id: Uuid,
    pub discount_type: String,
    pub discount_value: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub stock_cap: Option<i32>,
    pub sales_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub total_amount: BigDecimal,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub shipping_address: serde_json::Value,
    pub payment_method: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItem {
    pub order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub flash_sale_id: Option<Uuid>,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
    pub product_name: String,
    pub product_image: Option<String>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::processed_checkouts)]
pub struct DbProcessedCheckout {
    pub idempotency_key: String,
    pub order_id: Option<Uuid>,
    pub status: Option<String>,
    pub total_amount: Option<BigDecimal>,
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_checkouts)]
pub struct NewCheckoutClaim {
    pub idempotency_key: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reconciliation_issues)]
pub struct NewReconciliationIssue {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub flash_sale_id: Option<Uuid>,
    pub kind: String,
    pub detail: String,
}

/// Order header as the orchestrator hands it to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHeader {
    pub user_id: Uuid,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    pub transaction_id: Option<String>,
}

/// Immutable line item frozen at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub flash_sale_id: Option<Uuid>,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
    pub product_name: String,
    pub product_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedCheckout {
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: BigDecimal,
}

impl From<DbProduct> for Product {
    fn from(row: DbProduct) -> Self {
        Self {
            id: row.id,
            vendor_id: row.vendor_id,
            name: row.name,
            image_url: row.image_url,
            price: row.price,
            stock: row.stock,
        }
    }
}

impl TryFrom<DbFlashSale> for FlashSale {
    type Error = StoreError;

    fn try_from(row: DbFlashSale) -> Result<Self, Self::Error> {
        let discount_type = row
            .discount_type
            .parse()
            .map_err(|e: UnknownVariant| StoreError::Corrupt(format!("flash sale {}: {}", row.id, e)))?;
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            discount_type,
            discount_value: row.discount_value,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            stock_cap: row.stock_cap,
            sales_count: row.sales_count,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<&OrderHeader> for NewOrder {
    type Error = serde_json::Error;

    fn try_from(header: &OrderHeader) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: header.user_id,
            total_amount: header.total_amount.clone(),
            status: header.status.to_string(),
            order_date: header.order_date,
            shipping_address: serde_json::to_value(&header.shipping_address)?,
            payment_method: header.payment_method.clone(),
            transaction_id: header.transaction_id.clone(),
        })
    }
}

impl NewOrderItem {
    pub fn for_order(order_id: Uuid, line: &OrderLine) -> Self {
        Self {
            order_id,
            product_id: Some(line.product_id),
            flash_sale_id: line.flash_sale_id,
            quantity: line.quantity,
            price_at_purchase: line.price_at_purchase.clone(),
            product_name: line.product_name.clone(),
            product_image: line.product_image.clone(),
        }
    }
}

impl TryFrom<DbProcessedCheckout> for CheckoutClaim {
    type Error = StoreError;

    fn try_from(row: DbProcessedCheckout) -> Result<Self, Self::Error> {
        let (order_id, status, total_amount) = match (row.order_id, row.status, row.total_amount) {
            (Some(order_id), Some(status), Some(total_amount)) => (order_id, status, total_amount),
            (None, None, None) => return Ok(CheckoutClaim::InFlight),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "processed checkout {} is only partly filled in",
                    row.idempotency_key
                )))
            }
        };
        let status = status
            .parse()
            .map_err(|e: UnknownVariant| StoreError::Corrupt(format!("processed checkout {}: {}", row.idempotency_key, e)))?;
        Ok(CheckoutClaim::Processed(ProcessedCheckout {
            idempotency_key: row.idempotency_key,
            order_id,
            status,
            total_amount,
        }))
    }
}

impl From<&ReconciliationIssue> for NewReconciliationIssue {
    fn from(issue: &ReconciliationIssue) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: issue.order_id,
            product_id: issue.product_id,
            flash_sale_id: issue.flash_sale_id,
            kind: issue.kind.as_str().to_string(),
            detail: issue.detail.clone(),
        }
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: Some(event.processed),
            created_at: Some(event.created_at),
        }
    }
}
