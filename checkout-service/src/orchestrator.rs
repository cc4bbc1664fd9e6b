use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shared::*;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::inventory::{InventoryReconciler, SaleCapPolicy};
use crate::models::{OrderHeader, ProcessedCheckout};
use crate::notifier::OrderNotifier;
use crate::order_writer::OrderWriter;
use crate::snapshot::CartSnapshot;
use crate::store::{CheckoutClaim, CheckoutStore};

#[derive(Debug, Clone, Copy)]
pub struct CheckoutSettings {
    pub sale_cap_policy: SaleCapPolicy,
    /// How long to wait between looks at a key another checkout holds.
    pub claim_poll_interval: Duration,
    pub claim_poll_attempts: u32,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            sale_cap_policy: SaleCapPolicy::default(),
            claim_poll_interval: Duration::from_millis(100),
            claim_poll_attempts: 30,
        }
    }
}

/// Progress of one checkout attempt. Stages only move forward, one at a
/// time.
#[derive(Debug)]
pub struct CheckoutAttempt {
    pub id: Uuid,
    stage: CheckoutStage,
    reconciled: HashSet<Uuid>,
}

impl CheckoutAttempt {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: CheckoutStage::Initiated,
            reconciled: HashSet::new(),
        }
    }

    pub fn stage(&self) -> CheckoutStage {
        self.stage
    }

    /// Moves to the following stage. No-op once completed.
    pub fn advance(&mut self) -> CheckoutStage {
        if let Some(next) = self.stage.next() {
            self.stage = next;
        }
        self.stage
    }

    /// Claims a product line for reconciliation. Returns false if the line
    /// was already claimed in this attempt.
    pub fn claim_line(&mut self, product_id: Uuid) -> bool {
        self.reconciled.insert(product_id)
    }
}

impl Default for CheckoutAttempt {
    fn default() -> Self {
        Self::new()
    }
}

struct RecordedOrder {
    order_id: Uuid,
    header: OrderHeader,
    snapshot: CartSnapshot,
}

pub struct CheckoutOrchestrator {
    store: Arc<dyn CheckoutStore>,
    notifier: Arc<dyn OrderNotifier>,
    settings: CheckoutSettings,
}

impl CheckoutOrchestrator {
    pub fn new(store: Arc<dyn CheckoutStore>, notifier: Arc<dyn OrderNotifier>, settings: CheckoutSettings) -> Self {
        Self { store, notifier, settings }
    }

    /// Turns a settled payment and the customer's cart into a recorded order.
    ///
    /// Only failures up to and including the order write are returned as
    /// errors. Once the order is recorded the customer gets a confirmation;
    /// inventory, cart and notification problems are reported in the
    /// outcome's issues and the logs.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, attempt_id = tracing::field::Empty))]
    pub async fn place_order(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let mut attempt = CheckoutAttempt::new();
        tracing::Span::current().record("attempt_id", tracing::field::display(attempt.id));

        let result = self.run(&mut attempt, &request).await;
        if let Err(e) = &result {
            error!(
                stage = %attempt.stage(),
                orphaned_order = ?e.orphaned_order(),
                error = %e,
                "Checkout failed"
            );
        }
        result
    }

    async fn run(&self, attempt: &mut CheckoutAttempt, request: &CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let idempotency_key = request.idempotency_key();

        if let Some(key) = &idempotency_key {
            if let Some(replay) = self.claim(key).await? {
                return Ok(replay);
            }
        }

        let recorded = match self.record_order(attempt, request).await {
            Ok(recorded) => recorded,
            Err(e) => {
                if let Some(key) = &idempotency_key {
                    if let Err(release) = self.store.release_checkout(key).await {
                        warn!(%key, error = %release, "Failed to release checkout claim");
                    }
                }
                return Err(e);
            }
        };
        let RecordedOrder { order_id, header, snapshot } = recorded;

        if let Some(key) = idempotency_key {
            let record = ProcessedCheckout {
                idempotency_key: key,
                order_id,
                status: header.status,
                total_amount: header.total_amount.clone(),
            };
            if let Err(e) = self.store.complete_checkout(&record).await {
                warn!(%order_id, error = %e, "Failed to mark checkout processed; the key stays claimed");
            }
        }

        let status = header.status;
        let mut outcome = CheckoutOutcome {
            order_id,
            final_status: status,
            stage: attempt.stage(),
            total_amount: Some(header.total_amount.clone()),
            issues: Vec::new(),
            replayed: false,
        };

        if status.is_unsettled() {
            info!(%order_id, %status, "Payment not settled, order kept for audit without touching inventory or cart");
            return Ok(outcome);
        }

        // OrderRecorded -> InventoryReconciled
        let reconciler = InventoryReconciler::new(&*self.store, self.settings.sale_cap_policy);
        for line in snapshot.lines() {
            if !attempt.claim_line(line.product_id) {
                warn!(%order_id, product_id = %line.product_id, "Line already reconciled in this checkout, skipping");
                continue;
            }
            let result = reconciler.reconcile_line(order_id, line).await;
            outcome.issues.extend(result.issues);
        }
        attempt.advance();

        // InventoryReconciled -> CartCleared
        match self.store.clear_cart(request.user_id).await {
            Ok(removed) => info!(%order_id, removed, "Cart cleared"),
            Err(e) => warn!(%order_id, error = %e, "Failed to clear cart; stale items may reappear"),
        }
        attempt.advance();

        // CartCleared -> Completed
        self.spawn_notification(OrderPlacedNotification {
            order_id,
            customer_name: request.shipping_address.full_name.clone(),
            customer_phone: request.shipping_address.phone.clone(),
            total_amount: header.total_amount,
        });
        outcome.stage = attempt.advance();

        if outcome.issues.is_empty() {
            info!(%order_id, "Checkout completed");
        } else {
            warn!(%order_id, issues = outcome.issues.len(), "Checkout completed with reconciliation issues");
        }
        Ok(outcome)
    }

    /// Takes the key for this attempt. Returns the recorded outcome instead
    /// when the key already produced an order, waiting for a concurrent
    /// holder to finish if there is one.
    async fn claim(&self, key: &str) -> Result<Option<CheckoutOutcome>, CheckoutError> {
        for _ in 0..self.settings.claim_poll_attempts.max(1) {
            match self.store.claim_checkout(key).await.map_err(CheckoutError::Idempotency)? {
                CheckoutClaim::Claimed => return Ok(None),
                CheckoutClaim::Processed(processed) => {
                    info!(order_id = %processed.order_id, %key, "Checkout already processed, returning recorded order");
                    return Ok(Some(CheckoutOutcome {
                        order_id: processed.order_id,
                        final_status: processed.status,
                        stage: CheckoutStage::OrderRecorded,
                        total_amount: Some(processed.total_amount),
                        issues: Vec::new(),
                        replayed: true,
                    }));
                }
                CheckoutClaim::InFlight => {
                    debug!(%key, "Checkout key held by another request, waiting");
                    tokio::time::sleep(self.settings.claim_poll_interval).await;
                }
            }
        }
        Err(CheckoutError::InProgress(key.to_string()))
    }

    /// Initiated -> PricesResolved -> OrderRecorded.
    async fn record_order(&self, attempt: &mut CheckoutAttempt, request: &CheckoutRequest) -> Result<RecordedOrder, CheckoutError> {
        let snapshot = CartSnapshot::capture(&*self.store, &request.cart_items, Utc::now()).await?;
        attempt.advance();

        let header = OrderHeader {
            user_id: request.user_id,
            total_amount: snapshot.total().clone(),
            status: request.payment_result.status.order_status(),
            order_date: snapshot.taken_at(),
            shipping_address: request.shipping_address.clone(),
            payment_method: request.payment_result.method.clone(),
            transaction_id: request.payment_result.transaction_id.clone(),
        };
        let order_id = OrderWriter::new(&*self.store)
            .write(&header, &snapshot.order_lines())
            .await?;
        attempt.advance();

        Ok(RecordedOrder { order_id, header, snapshot })
    }

    fn spawn_notification(&self, notification: OrderPlacedNotification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let order_id = notification.order_id;
            if let Err(e) = notifier.notify(notification).await {
                error!(%order_id, error = %e, "Post-commit notification failed");
            }
        });
    }
}
