use shared::{IssueKind, ReconciliationIssue};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::models::{OrderHeader, OrderLine};
use crate::store::{IssueStore, OrderStore};

/// Persists an order header and then its line items.
pub struct OrderWriter<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> OrderWriter<'a, S>
where
    S: OrderStore + IssueStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Writes the header, then every item under the id the store generated.
    ///
    /// A header that made it in while its items did not stays in place and is
    /// flagged for manual reconciliation; the caller gets `OrderItemsWrite`
    /// carrying that order id.
    pub async fn write(&self, header: &OrderHeader, lines: &[OrderLine]) -> Result<Uuid, CheckoutError> {
        let order_id = self
            .store
            .insert_order(header)
            .await
            .map_err(CheckoutError::OrderHeaderWrite)?;

        if let Err(source) = self.store.insert_order_items(order_id, lines).await {
            error!(%order_id, error = %source, "Order header recorded but items insert failed");
            let issue = ReconciliationIssue {
                order_id: Some(order_id),
                product_id: None,
                flash_sale_id: None,
                kind: IssueKind::OrderWithoutItems,
                detail: format!(
                    "header recorded with total {} but {} item(s) failed to insert: {}",
                    header.total_amount,
                    lines.len(),
                    source
                ),
            };
            if let Err(e) = self.store.flag_issue(&issue).await {
                error!(%order_id, error = %e, "Failed to flag order without items");
            }
            return Err(CheckoutError::OrderItemsWrite { order_id, source });
        }

        info!(%order_id, items = lines.len(), total = %header.total_amount, "Order recorded");
        Ok(order_id)
    }
}
