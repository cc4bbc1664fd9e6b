//! Stock and flash-sale counter bookkeeping for a recorded order.
//!
//! Payment has been taken by the time this runs, so nothing here may fail
//! the checkout. Problems are logged, flagged for operators and skipped.

use shared::{IssueKind, ReconciliationIssue};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::snapshot::{AppliedSale, PricedLine};
use crate::store::{InventoryStore, IssueStore, SaleCountUpdate, StockDecrement};

/// What a flash sale's `stock_cap` means when its counter is incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SaleCapPolicy {
    /// Always increment; a counter that ends above its cap is flagged.
    #[default]
    Informational,
    /// Only increment while the result stays within the cap.
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineReconciliation {
    pub new_stock: Option<i32>,
    pub sales_count: Option<i32>,
    pub issues: Vec<ReconciliationIssue>,
}

pub struct InventoryReconciler<'a, S: ?Sized> {
    store: &'a S,
    policy: SaleCapPolicy,
}

impl<'a, S> InventoryReconciler<'a, S>
where
    S: InventoryStore + IssueStore + ?Sized,
{
    pub fn new(store: &'a S, policy: SaleCapPolicy) -> Self {
        Self { store, policy }
    }

    /// `stock = max(0, stock - quantity)`, applied server-side.
    pub async fn decrement(&self, product_id: Uuid, quantity: i32) -> Result<StockDecrement, StoreError> {
        self.store.decrement_stock(product_id, quantity).await
    }

    pub async fn increment_sale_count(&self, sale: &AppliedSale, quantity: i32) -> Result<SaleCountUpdate, StoreError> {
        let cap = match self.policy {
            SaleCapPolicy::Informational => None,
            SaleCapPolicy::Enforce => sale.stock_cap,
        };
        self.store.increment_sales_count(sale.id, quantity, cap).await
    }

    /// Applies one line of a committed order. Never fails; everything that
    /// went wrong is returned (and flagged) as issues.
    pub async fn reconcile_line(&self, order_id: Uuid, line: &PricedLine) -> LineReconciliation {
        let mut outcome = LineReconciliation::default();
        let product_id = line.product_id;

        match self.decrement(product_id, line.quantity).await {
            Ok(StockDecrement { new_stock, oversold: false }) => {
                info!(%order_id, %product_id, quantity = line.quantity, new_stock, "Stock decremented");
                outcome.new_stock = Some(new_stock);
            }
            Ok(StockDecrement { new_stock, oversold: true }) => {
                warn!(%order_id, %product_id, quantity = line.quantity, "Stock floored at zero, order exceeded stock on hand");
                outcome.new_stock = Some(new_stock);
                outcome.issues.push(self.issue(
                    order_id,
                    line,
                    None,
                    IssueKind::Oversold,
                    format!("ordered {} but stock ran out; stock set to 0", line.quantity),
                ));
            }
            Err(e) => {
                error!(%order_id, %product_id, error = %e, "Stock decrement failed, skipping item");
                outcome.issues.push(self.issue(
                    order_id,
                    line,
                    None,
                    IssueKind::StockDecrementFailed,
                    format!("could not decrement stock by {}: {}", line.quantity, e),
                ));
            }
        }

        if let Some(sale) = &line.sale {
            self.reconcile_sale(order_id, line, sale, &mut outcome).await;
        }

        for issue in &outcome.issues {
            if let Err(e) = self.store.flag_issue(issue).await {
                error!(%order_id, %product_id, kind = issue.kind.as_str(), error = %e, "Failed to flag reconciliation issue");
            }
        }

        outcome
    }

    async fn reconcile_sale(&self, order_id: Uuid, line: &PricedLine, sale: &AppliedSale, outcome: &mut LineReconciliation) {
        let sale_id = sale.id;

        match self.increment_sale_count(sale, line.quantity).await {
            Ok(SaleCountUpdate::Applied { sales_count }) => {
                outcome.sales_count = Some(sales_count);
                match sale.stock_cap {
                    Some(cap) if sales_count > cap => {
                        warn!(%order_id, %sale_id, sales_count, cap, "Flash sale counter exceeded its cap");
                        outcome.issues.push(self.issue(
                            order_id,
                            line,
                            Some(sale_id),
                            IssueKind::SaleCapOverrun,
                            format!("sales_count is {sales_count}, above stock_cap {cap}"),
                        ));
                    }
                    _ => info!(%order_id, %sale_id, sales_count, "Flash sale counter incremented"),
                }
            }
            Ok(SaleCountUpdate::RejectedAtCap) => {
                warn!(%order_id, %sale_id, quantity = line.quantity, cap = ?sale.stock_cap, "Flash sale increment refused at cap");
                outcome.issues.push(self.issue(
                    order_id,
                    line,
                    Some(sale_id),
                    IssueKind::SaleCapOverrun,
                    format!(
                        "discounted {} unit(s) but the counter is at its cap {:?}; counter left unchanged",
                        line.quantity, sale.stock_cap
                    ),
                ));
            }
            Err(e) => {
                error!(%order_id, %sale_id, error = %e, "Flash sale counter update failed");
                outcome.issues.push(self.issue(
                    order_id,
                    line,
                    Some(sale_id),
                    IssueKind::SaleCountFailed,
                    format!("could not add {} to sales_count: {}", line.quantity, e),
                ));
            }
        }
    }

    fn issue(
        &self,
        order_id: Uuid,
        line: &PricedLine,
        flash_sale_id: Option<Uuid>,
        kind: IssueKind,
        detail: String,
    ) -> ReconciliationIssue {
        ReconciliationIssue {
            order_id: Some(order_id),
            product_id: Some(line.product_id),
            flash_sale_id,
            kind,
            detail,
        }
    }
}
