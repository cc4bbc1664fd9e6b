pub mod model;
pub mod pricing;

pub use model::*;
pub use pricing::PricingError;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Everything the orchestrator needs once the payment gateway has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub cart_items: Vec<CartLine>,
    pub shipping_address: ShippingAddress,
    pub payment_result: PaymentResult,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CheckoutRequest {
    /// Key under which a processed checkout is remembered. An explicit key
    /// wins; otherwise the payment transaction identifies the purchase.
    /// Unsettled outcomes get their own key so that a later settlement of
    /// the same transaction is not answered with the failed order.
    pub fn idempotency_key(&self) -> Option<String> {
        if let Some(key) = self.idempotency_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let method = &self.payment_result.method;
        let status = self.payment_result.status.order_status();
        self.payment_result
            .transaction_id
            .as_ref()
            .filter(|tx| !tx.is_empty())
            .map(|tx| {
                if status.is_unsettled() {
                    format!("{method}:{tx}:{status}")
                } else {
                    format!("{method}:{tx}")
                }
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckoutStage {
    Initiated,
    PricesResolved,
    OrderRecorded,
    InventoryReconciled,
    CartCleared,
    Completed,
}

impl CheckoutStage {
    pub fn next(&self) -> Option<CheckoutStage> {
        match self {
            CheckoutStage::Initiated => Some(CheckoutStage::PricesResolved),
            CheckoutStage::PricesResolved => Some(CheckoutStage::OrderRecorded),
            CheckoutStage::OrderRecorded => Some(CheckoutStage::InventoryReconciled),
            CheckoutStage::InventoryReconciled => Some(CheckoutStage::CartCleared),
            CheckoutStage::CartCleared => Some(CheckoutStage::Completed),
            CheckoutStage::Completed => None,
        }
    }
}

impl fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    OrderWithoutItems,
    StockDecrementFailed,
    Oversold,
    SaleCountFailed,
    SaleCapOverrun,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::OrderWithoutItems => "order_without_items",
            IssueKind::StockDecrementFailed => "stock_decrement_failed",
            IssueKind::Oversold => "oversold",
            IssueKind::SaleCountFailed => "sale_count_failed",
            IssueKind::SaleCapOverrun => "sale_cap_overrun",
        }
    }
}

/// A problem left behind by a checkout that an operator has to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationIssue {
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub flash_sale_id: Option<Uuid>,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub final_status: OrderStatus,
    pub stage: CheckoutStage,
    pub total_amount: Option<BigDecimal>,
    #[serde(default)]
    pub issues: Vec<ReconciliationIssue>,
    #[serde(default)]
    pub replayed: bool,
}

/// Payload handed to the post-commit notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacedNotification {
    pub order_id: Uuid,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub total_amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutCommand {
    pub id: Uuid,
    pub request: CheckoutRequest,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub status: CommandStatus,
    pub outcome: Option<CheckoutOutcome>,
    pub failed_stage: Option<CheckoutStage>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

pub const ORDER_PLACED_EVENT: &str = "OrderPlaced";

impl CheckoutCommand {
    pub fn new(request: CheckoutRequest) -> Self {
        let id = Uuid::new_v4();
        let idempotency_key = request.idempotency_key().unwrap_or_else(|| id.to_string());
        Self {
            id,
            request,
            idempotency_key,
            created_at: Utc::now(),
        }
    }
}

impl CheckoutReply {
    pub fn success(command_id: Uuid, outcome: CheckoutOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            status: CommandStatus::Success,
            outcome: Some(outcome),
            failed_stage: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(command_id: Uuid, failed_stage: CheckoutStage, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            status: CommandStatus::Failed,
            outcome: None,
            failed_stage: Some(failed_stage),
            error: Some(error),
            created_at: Utc::now(),
        }
    }
}

impl OutboxEvent {
    pub fn order_placed(notification: &OrderPlacedNotification) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: notification.order_id,
            event_type: ORDER_PLACED_EVENT.to_string(),
            event_data: serde_json::to_value(notification)?,
            processed: false,
            created_at: Utc::now(),
        })
    }
}
