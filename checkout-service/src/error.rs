use diesel_async::pooled_connection::bb8::RunError;
use shared::{CheckoutStage, PricingError};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{entity} {id} kept changing under concurrent updates")]
    Contention { entity: &'static str, id: Uuid },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<RunError> for StoreError {
    fn from(err: RunError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Failures that abort a checkout attempt. Anything downstream of
/// `OrderRecorded` is best-effort and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("invalid checkout request: {0}")]
    InvalidRequest(String),
    #[error("product {0} is not available")]
    ProductNotFound(Uuid),
    #[error("pricing failed: {0}")]
    Pricing(#[from] PricingError),
    #[error("could not read catalog: {0}")]
    Catalog(#[source] StoreError),
    #[error("could not claim the checkout key: {0}")]
    Idempotency(#[source] StoreError),
    #[error("checkout {0} is still being processed by another request")]
    InProgress(String),
    #[error("could not record order header: {0}")]
    OrderHeaderWrite(#[source] StoreError),
    #[error("order {order_id} was recorded without its items: {source}")]
    OrderItemsWrite {
        order_id: Uuid,
        #[source]
        source: StoreError,
    },
}

impl CheckoutError {
    /// Stage the attempt was in when it failed.
    pub fn stage(&self) -> CheckoutStage {
        match self {
            CheckoutError::InvalidRequest(_)
            | CheckoutError::ProductNotFound(_)
            | CheckoutError::Pricing(_)
            | CheckoutError::Catalog(_)
            | CheckoutError::Idempotency(_)
            | CheckoutError::InProgress(_) => CheckoutStage::Initiated,
            CheckoutError::OrderHeaderWrite(_) | CheckoutError::OrderItemsWrite { .. } => {
                CheckoutStage::PricesResolved
            }
        }
    }

    /// Order row left behind by the failure, if any.
    pub fn orphaned_order(&self) -> Option<Uuid> {
        match self {
            CheckoutError::OrderItemsWrite { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}
