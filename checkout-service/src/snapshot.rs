use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use shared::pricing::{self, round_price};
use shared::{CartLine, FlashSale, Product};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::models::OrderLine;
use crate::store::CatalogStore;

/// Largest quantity accepted for a single product in one checkout.
pub const MAX_LINE_QUANTITY: i32 = 10_000;

/// Sale that discounted a line, as it looked when prices were resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSale {
    pub id: Uuid,
    pub stock_cap: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub sale: Option<AppliedSale>,
}

impl PricedLine {
    pub fn line_total(&self) -> BigDecimal {
        round_price(self.unit_price.clone() * BigDecimal::from(self.quantity))
    }

    pub fn to_order_line(&self) -> OrderLine {
        OrderLine {
            product_id: self.product_id,
            flash_sale_id: self.sale.as_ref().map(|sale| sale.id),
            quantity: self.quantity,
            price_at_purchase: self.unit_price.clone(),
            product_name: self.product_name.clone(),
            product_image: self.product_image.clone(),
        }
    }
}

/// The cart as it stood when checkout began, priced against the flash
/// sales live at that instant.
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    taken_at: DateTime<Utc>,
    lines: Vec<PricedLine>,
    total: BigDecimal,
}

impl CartSnapshot {
    pub async fn capture<S>(catalog: &S, cart: &[CartLine], at: DateTime<Utc>) -> Result<Self, CheckoutError>
    where
        S: CatalogStore + ?Sized,
    {
        let quantities = merge_lines(cart)?;
        let product_ids: Vec<Uuid> = quantities.iter().map(|(id, _)| *id).collect();

        let products: HashMap<Uuid, Product> = catalog
            .products_by_ids(&product_ids)
            .await
            .map_err(CheckoutError::Catalog)?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        if let Some(missing) = product_ids.iter().find(|id| !products.contains_key(*id)) {
            return Err(CheckoutError::ProductNotFound(*missing));
        }

        let sales = catalog
            .live_flash_sales(&product_ids, at)
            .await
            .map_err(CheckoutError::Catalog)?;

        let lines = quantities
            .into_iter()
            .map(|(product_id, quantity)| price_line(&products[&product_id], quantity, &sales, at))
            .collect::<Result<Vec<_>, CheckoutError>>()?;

        Ok(Self::from_lines(at, lines))
    }

    fn from_lines(taken_at: DateTime<Utc>, lines: Vec<PricedLine>) -> Self {
        let total = round_price(
            lines
                .iter()
                .map(PricedLine::line_total)
                .fold(BigDecimal::zero(), |acc, line| acc + line),
        );
        Self { taken_at, lines, total }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn lines(&self) -> &[PricedLine] {
        &self.lines
    }

    pub fn total(&self) -> &BigDecimal {
        &self.total
    }

    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.lines.iter().map(PricedLine::to_order_line).collect()
    }
}

fn price_line(
    product: &Product,
    quantity: i32,
    sales: &[FlashSale],
    at: DateTime<Utc>,
) -> Result<PricedLine, CheckoutError> {
    let (unit_price, sale) = pricing::price_product(product.id, &product.price, sales, at)?;
    Ok(PricedLine {
        product_id: product.id,
        product_name: product.name.clone(),
        product_image: product.image_url.clone(),
        quantity,
        unit_price,
        sale: sale.map(|sale| AppliedSale {
            id: sale.id,
            stock_cap: sale.stock_cap,
        }),
    })
}

/// Folds duplicate cart lines for one product together, keeping first-seen
/// order.
fn merge_lines(cart: &[CartLine]) -> Result<Vec<(Uuid, i32)>, CheckoutError> {
    if cart.is_empty() {
        return Err(CheckoutError::InvalidRequest("cart is empty".to_string()));
    }

    let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(cart.len());
    for line in cart {
        if line.quantity <= 0 {
            return Err(CheckoutError::InvalidRequest(format!(
                "quantity for product {} must be positive, got {}",
                line.product_id, line.quantity
            )));
        }
        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, quantity)) => *quantity = quantity.saturating_add(line.quantity),
            None => merged.push((line.product_id, line.quantity)),
        }
    }

    if let Some((product_id, quantity)) = merged.iter().find(|(_, q)| *q > MAX_LINE_QUANTITY) {
        return Err(CheckoutError::InvalidRequest(format!(
            "quantity for product {product_id} exceeds {MAX_LINE_QUANTITY}, got {quantity}"
        )));
    }

    Ok(merged)
}
