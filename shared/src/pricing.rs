//! Effective unit price resolution under flash sales.
//!
//! Discount values are validated, never clamped: a sale whose value falls
//! outside its allowed range is a configuration error and pricing refuses it.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use num_traits::Zero;
use uuid::Uuid;

use crate::model::{DiscountType, FlashSale};

/// Monetary amounts are kept at two decimal places.
pub const PRICE_SCALE: i64 = 2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error("percentage discount must be strictly between 0 and 100, got {0}")]
    PercentageOutOfRange(BigDecimal),
    #[error("fixed discount must be greater than 0, got {0}")]
    FixedAmountNotPositive(BigDecimal),
    #[error("flash sale {sale_id} has an invalid discount: {reason}")]
    InvalidSale { sale_id: Uuid, reason: String },
    #[error("product {product_id} has several live flash sales created at the same instant: {sale_ids:?}")]
    AmbiguousSale { product_id: Uuid, sale_ids: Vec<Uuid> },
    #[error("base price must not be negative, got {0}")]
    NegativePrice(BigDecimal),
}

/// Checks a discount the way it has to be checked when a sale is created.
pub fn validate_discount(discount_type: DiscountType, value: &BigDecimal) -> Result<(), PricingError> {
    match discount_type {
        DiscountType::Percentage => {
            if value <= &BigDecimal::zero() || value >= &BigDecimal::from(100) {
                return Err(PricingError::PercentageOutOfRange(value.clone()));
            }
        }
        DiscountType::FixedAmount => {
            if value <= &BigDecimal::zero() {
                return Err(PricingError::FixedAmountNotPositive(value.clone()));
            }
        }
    }
    Ok(())
}

/// A sale discounts purchases at `at` when it is switched on, `at` lies in
/// `[start_date, end_date]` and its cap (if any) is not yet reached.
pub fn is_effective(sale: &FlashSale, at: DateTime<Utc>) -> bool {
    sale.is_active && sale.start_date <= at && at <= sale.end_date && !sale.is_exhausted()
}

/// Picks the one sale that applies to `product_id` at `at`.
///
/// The most recently created effective sale wins. Two effective sales sharing
/// that latest `created_at` cannot be ordered and are reported as ambiguous.
pub fn select_sale<'a>(
    sales: &'a [FlashSale],
    product_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<&'a FlashSale>, PricingError> {
    let mut candidates: Vec<&FlashSale> = sales
        .iter()
        .filter(|sale| sale.product_id == product_id && is_effective(sale, at))
        .collect();

    candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        [latest, rest @ ..] => {
            let tied: Vec<Uuid> = rest
                .iter()
                .take_while(|sale| sale.created_at == latest.created_at)
                .map(|sale| sale.id)
                .collect();
            if tied.is_empty() {
                Ok(Some(*latest))
            } else {
                let mut sale_ids = vec![latest.id];
                sale_ids.extend(tied);
                Err(PricingError::AmbiguousSale { product_id, sale_ids })
            }
        }
    }
}

/// Effective unit price of a product priced `base_price` under `sale`.
pub fn resolve_price(base_price: &BigDecimal, sale: Option<&FlashSale>) -> Result<BigDecimal, PricingError> {
    if base_price < &BigDecimal::zero() {
        return Err(PricingError::NegativePrice(base_price.clone()));
    }

    let Some(sale) = sale else {
        return Ok(round_price(base_price.clone()));
    };

    validate_discount(sale.discount_type, &sale.discount_value).map_err(|e| PricingError::InvalidSale {
        sale_id: sale.id,
        reason: e.to_string(),
    })?;

    let price = match sale.discount_type {
        DiscountType::Percentage => {
            let hundred = BigDecimal::from(100);
            base_price.clone() * (hundred.clone() - sale.discount_value.clone()) / hundred
        }
        DiscountType::FixedAmount => {
            let discounted = base_price.clone() - sale.discount_value.clone();
            if discounted < BigDecimal::zero() {
                BigDecimal::zero()
            } else {
                discounted
            }
        }
    };

    Ok(round_price(price))
}

/// Selects the applicable sale for a product and resolves its unit price.
pub fn price_product<'a>(
    product_id: Uuid,
    base_price: &BigDecimal,
    sales: &'a [FlashSale],
    at: DateTime<Utc>,
) -> Result<(BigDecimal, Option<&'a FlashSale>), PricingError> {
    let sale = select_sale(sales, product_id, at)?;
    Ok((resolve_price(base_price, sale)?, sale))
}

pub fn round_price(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(PRICE_SCALE, RoundingMode::HalfUp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn sale(product_id: Uuid, discount_type: DiscountType, value: &str) -> FlashSale {
        let now = Utc::now();
        FlashSale {
            id: Uuid::new_v4(),
            product_id,
            discount_type,
            discount_value: dec(value),
            start_date: now - Duration::hours(1),
            end_date: now + Duration::hours(1),
            is_active: true,
            stock_cap: None,
            sales_count: 0,
            created_at: now - Duration::days(1),
        }
    }

    #[test]
    fn no_sale_returns_base_price() {
        assert_eq!(resolve_price(&dec("100.00"), None).unwrap(), dec("100.00"));
    }

    #[test]
    fn percentage_sale_discounts_price() {
        let s = sale(Uuid::new_v4(), DiscountType::Percentage, "20");
        assert_eq!(resolve_price(&dec("100.00"), Some(&s)).unwrap(), dec("80.00"));
    }

    #[test]
    fn percentage_rounds_half_up_to_cents() {
        let s = sale(Uuid::new_v4(), DiscountType::Percentage, "15");
        // 9.99 * 0.85 = 8.4915
        assert_eq!(resolve_price(&dec("9.99"), Some(&s)).unwrap(), dec("8.49"));
        let s = sale(Uuid::new_v4(), DiscountType::Percentage, "50");
        // 0.05 * 0.5 = 0.025
        assert_eq!(resolve_price(&dec("0.05"), Some(&s)).unwrap(), dec("0.03"));
    }

    #[test]
    fn fixed_amount_floors_at_zero() {
        let s = sale(Uuid::new_v4(), DiscountType::FixedAmount, "150");
        assert_eq!(resolve_price(&dec("100.00"), Some(&s)).unwrap(), dec("0.00"));

        let s = sale(Uuid::new_v4(), DiscountType::FixedAmount, "25.50");
        assert_eq!(resolve_price(&dec("100.00"), Some(&s)).unwrap(), dec("74.50"));
    }

    #[test]
    fn invalid_discount_values_are_rejected_not_clamped() {
        for value in ["0", "100", "120", "-5"] {
            let s = sale(Uuid::new_v4(), DiscountType::Percentage, value);
            assert!(
                matches!(resolve_price(&dec("10"), Some(&s)), Err(PricingError::InvalidSale { .. })),
                "percentage {value} should be rejected"
            );
        }
        let s = sale(Uuid::new_v4(), DiscountType::FixedAmount, "0");
        assert!(resolve_price(&dec("10"), Some(&s)).is_err());
        assert!(validate_discount(DiscountType::Percentage, &dec("99.99")).is_ok());
    }

    #[test]
    fn negative_base_price_is_rejected() {
        assert_eq!(
            resolve_price(&dec("-1"), None),
            Err(PricingError::NegativePrice(dec("-1")))
        );
    }

    #[test]
    fn inactive_or_out_of_window_sales_do_not_apply() {
        let product_id = Uuid::new_v4();
        let now = Utc::now();

        let mut inactive = sale(product_id, DiscountType::Percentage, "20");
        inactive.is_active = false;

        let mut expired = sale(product_id, DiscountType::Percentage, "20");
        expired.start_date = now - Duration::days(3);
        expired.end_date = now - Duration::days(2);

        let mut upcoming = sale(product_id, DiscountType::Percentage, "20");
        upcoming.start_date = now + Duration::days(2);
        upcoming.end_date = now + Duration::days(3);

        let sales = vec![inactive, expired, upcoming];
        let (price, applied) = price_product(product_id, &dec("100.00"), &sales, now).unwrap();
        assert_eq!(price, dec("100.00"));
        assert!(applied.is_none());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let s = sale(Uuid::new_v4(), DiscountType::Percentage, "20");
        assert!(is_effective(&s, s.start_date));
        assert!(is_effective(&s, s.end_date));
        assert!(!is_effective(&s, s.end_date + Duration::milliseconds(1)));
    }

    #[test]
    fn exhausted_sale_no_longer_discounts() {
        let product_id = Uuid::new_v4();
        let mut s = sale(product_id, DiscountType::Percentage, "20");
        s.stock_cap = Some(10);
        s.sales_count = 10;
        let sales = vec![s];
        let (price, applied) = price_product(product_id, &dec("100.00"), &sales, Utc::now()).unwrap();
        assert_eq!(price, dec("100.00"));
        assert!(applied.is_none());
    }

    #[test]
    fn latest_created_sale_wins() {
        let product_id = Uuid::new_v4();
        let older = sale(product_id, DiscountType::Percentage, "10");
        let mut newer = sale(product_id, DiscountType::Percentage, "30");
        newer.created_at = older.created_at + Duration::minutes(5);
        let other_product = sale(Uuid::new_v4(), DiscountType::Percentage, "90");

        let sales = vec![older, newer.clone(), other_product];
        let (price, applied) = price_product(product_id, &dec("100.00"), &sales, Utc::now()).unwrap();
        assert_eq!(applied.map(|s| s.id), Some(newer.id));
        assert_eq!(price, dec("70.00"));
    }

    #[test]
    fn simultaneous_sales_are_ambiguous() {
        let product_id = Uuid::new_v4();
        let a = sale(product_id, DiscountType::Percentage, "10");
        let mut b = sale(product_id, DiscountType::FixedAmount, "5");
        b.created_at = a.created_at;

        let sales = vec![a, b];
        assert!(matches!(
            select_sale(&sales, product_id, Utc::now()),
            Err(PricingError::AmbiguousSale { sale_ids, .. }) if sale_ids.len() == 2
        ));
    }
}
