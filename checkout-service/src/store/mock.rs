//! In-memory store for tests, with per-operation failure injection.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{FlashSale, Product, ReconciliationIssue};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CartStore, CatalogStore, CheckoutClaim, InventoryStore, IssueStore, OrderStore, SaleCountUpdate,
    StockDecrement,
};
use crate::error::StoreError;
use crate::models::{OrderHeader, OrderLine, ProcessedCheckout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    LoadCatalog,
    InsertOrder,
    InsertOrderItems,
    DecrementStock,
    IncrementSalesCount,
    ClearCart,
    FlagIssue,
    ClaimCheckout,
    CompleteCheckout,
}

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    flash_sales: HashMap<Uuid, FlashSale>,
    carts: HashMap<Uuid, Vec<Uuid>>,
    orders: HashMap<Uuid, OrderHeader>,
    order_items: HashMap<Uuid, Vec<OrderLine>>,
    /// `None` marks a claim whose order is not recorded yet.
    processed: HashMap<String, Option<ProcessedCheckout>>,
    issues: Vec<ReconciliationIssue>,
    decrement_calls: Vec<(Uuid, i32)>,
    increment_calls: Vec<(Uuid, i32)>,
    failing: HashSet<Op>,
    failing_products: HashSet<Uuid>,
    order_insert_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockCheckoutStore {
    state: RwLock<State>,
}

impl MockCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(&self, product: Product) {
        self.state.write().await.products.insert(product.id, product);
    }

    pub async fn add_flash_sale(&self, sale: FlashSale) {
        self.state.write().await.flash_sales.insert(sale.id, sale);
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid) {
        self.state.write().await.carts.entry(user_id).or_default().push(product_id);
    }

    pub async fn fail_on(&self, op: Op) {
        self.state.write().await.failing.insert(op);
    }

    /// Makes stock decrements fail for one product only.
    pub async fn fail_decrement_for(&self, product_id: Uuid) {
        self.state.write().await.failing_products.insert(product_id);
    }

    /// Holds every order header insert for `delay` before it lands.
    pub async fn delay_order_insert(&self, delay: Duration) {
        self.state.write().await.order_insert_delay = Some(delay);
    }

    /// Leaves a claim on `key` as if another checkout were still running.
    pub async fn hold_claim(&self, key: &str) {
        self.state.write().await.processed.insert(key.to_string(), None);
    }

    /// `Some(None)` while a claim is held, `Some(Some(_))` once processed.
    pub async fn checkout_claim(&self, key: &str) -> Option<Option<ProcessedCheckout>> {
        self.state.read().await.processed.get(key).cloned()
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.state.read().await.products.get(&id).cloned()
    }

    pub async fn flash_sale(&self, id: Uuid) -> Option<FlashSale> {
        self.state.read().await.flash_sales.get(&id).cloned()
    }

    pub async fn cart(&self, user_id: Uuid) -> Vec<Uuid> {
        self.state.read().await.carts.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn order(&self, id: Uuid) -> Option<OrderHeader> {
        self.state.read().await.orders.get(&id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn items(&self, order_id: Uuid) -> Vec<OrderLine> {
        self.state.read().await.order_items.get(&order_id).cloned().unwrap_or_default()
    }

    pub async fn issues(&self) -> Vec<ReconciliationIssue> {
        self.state.read().await.issues.clone()
    }

    pub async fn decrement_calls(&self) -> Vec<(Uuid, i32)> {
        self.state.read().await.decrement_calls.clone()
    }

    pub async fn increment_calls(&self) -> Vec<(Uuid, i32)> {
        self.state.read().await.increment_calls.clone()
    }

    async fn check(&self, op: Op) -> Result<(), StoreError> {
        if self.state.read().await.failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MockCheckoutStore {
    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        self.check(Op::LoadCatalog).await?;
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn live_flash_sales(&self, product_ids: &[Uuid], at: DateTime<Utc>) -> Result<Vec<FlashSale>, StoreError> {
        self.check(Op::LoadCatalog).await?;
        let state = self.state.read().await;
        Ok(state
            .flash_sales
            .values()
            .filter(|sale| product_ids.contains(&sale.product_id))
            .filter(|sale| sale.is_active && sale.start_date <= at && at <= sale.end_date)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderStore for MockCheckoutStore {
    async fn insert_order(&self, header: &OrderHeader) -> Result<Uuid, StoreError> {
        self.check(Op::InsertOrder).await?;
        let delay = self.state.read().await.order_insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = Uuid::new_v4();
        self.state.write().await.orders.insert(id, header.clone());
        Ok(id)
    }

    async fn insert_order_items(&self, order_id: Uuid, lines: &[OrderLine]) -> Result<(), StoreError> {
        self.check(Op::InsertOrderItems).await?;
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound { entity: "order", id: order_id });
        }
        state.order_items.insert(order_id, lines.to_vec());
        Ok(())
    }

    async fn claim_checkout(&self, key: &str) -> Result<CheckoutClaim, StoreError> {
        self.check(Op::ClaimCheckout).await?;
        let mut state = self.state.write().await;
        Ok(match state.processed.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(None);
                CheckoutClaim::Claimed
            }
            Entry::Occupied(entry) => match entry.get() {
                Some(processed) => CheckoutClaim::Processed(processed.clone()),
                None => CheckoutClaim::InFlight,
            },
        })
    }

    async fn complete_checkout(&self, record: &ProcessedCheckout) -> Result<(), StoreError> {
        self.check(Op::CompleteCheckout).await?;
        let mut state = self.state.write().await;
        match state.processed.get_mut(&record.idempotency_key) {
            Some(slot) if slot.is_none() => {
                *slot = Some(record.clone());
                Ok(())
            }
            _ => Err(StoreError::NotFound { entity: "checkout claim", id: record.order_id }),
        }
    }

    async fn release_checkout(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if matches!(state.processed.get(key), Some(None)) {
            state.processed.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MockCheckoutStore {
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<StockDecrement, StoreError> {
        let mut state = self.state.write().await;
        state.decrement_calls.push((product_id, quantity));
        if state.failing.contains(&Op::DecrementStock) || state.failing_products.contains(&product_id) {
            return Err(StoreError::Unavailable("injected failure on DecrementStock".to_string()));
        }
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::NotFound { entity: "product", id: product_id })?;
        let oversold = quantity > product.stock;
        product.stock = (product.stock - quantity).max(0);
        Ok(StockDecrement { new_stock: product.stock, oversold })
    }

    async fn increment_sales_count(
        &self,
        sale_id: Uuid,
        quantity: i32,
        cap: Option<i32>,
    ) -> Result<SaleCountUpdate, StoreError> {
        let mut state = self.state.write().await;
        state.increment_calls.push((sale_id, quantity));
        if state.failing.contains(&Op::IncrementSalesCount) {
            return Err(StoreError::Unavailable("injected failure on IncrementSalesCount".to_string()));
        }
        let sale = state
            .flash_sales
            .get_mut(&sale_id)
            .ok_or(StoreError::NotFound { entity: "flash sale", id: sale_id })?;
        if let Some(cap) = cap {
            if sale.sales_count > cap - quantity {
                return Ok(SaleCountUpdate::RejectedAtCap);
            }
        }
        sale.sales_count += quantity;
        Ok(SaleCountUpdate::Applied { sales_count: sale.sales_count })
    }
}

#[async_trait]
impl CartStore for MockCheckoutStore {
    async fn clear_cart(&self, user_id: Uuid) -> Result<usize, StoreError> {
        self.check(Op::ClearCart).await?;
        Ok(self.state.write().await.carts.remove(&user_id).map(|items| items.len()).unwrap_or(0))
    }
}

#[async_trait]
impl IssueStore for MockCheckoutStore {
    async fn flag_issue(&self, issue: &ReconciliationIssue) -> Result<(), StoreError> {
        self.check(Op::FlagIssue).await?;
        self.state.write().await.issues.push(issue.clone());
        Ok(())
    }
}
